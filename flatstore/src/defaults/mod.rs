// Default values for newly introduced fields

use crate::value::{FieldType, Value};
use chrono::Utc;
use regex::Regex;

/// Supplies the value written into existing records when a field is added
/// to a collection.
pub trait DefaultValueProvider: Send + Sync {
    fn default_for(&self, field: &str, field_type: FieldType) -> Value;
}

#[derive(Debug, Clone, Copy)]
enum NameRule {
    False,
    Now,
    Null,
    Zero,
}

/// Looks at the field name first (`is_active` -> false, `created_at` ->
/// now, `owner_id` -> null, `item_count` -> 0) and falls back to a default
/// for the field type.
pub struct PatternDefaults {
    rules: Vec<(Regex, NameRule)>,
}

impl PatternDefaults {
    pub fn new() -> Self {
        let rules = [
            (r"^(is|has|can)_", NameRule::False),
            (r"(_at|_date)$|^(created|updated|deleted)_", NameRule::Now),
            (r"(_id|_key)$", NameRule::Null),
            (r"(_count|_total)$|^num_", NameRule::Zero),
        ];
        PatternDefaults {
            rules: rules
                .into_iter()
                .filter_map(|(pattern, rule)| Regex::new(pattern).ok().map(|re| (re, rule)))
                .collect(),
        }
    }

    fn by_name(&self, field: &str) -> Option<Value> {
        let name = field.to_ascii_lowercase();
        let (_, rule) = self.rules.iter().find(|(re, _)| re.is_match(&name))?;
        Some(match rule {
            NameRule::False => Value::Boolean(false),
            NameRule::Now => Value::DateTime(Utc::now()),
            NameRule::Null => Value::Null,
            NameRule::Zero => Value::Integer(0),
        })
    }
}

impl Default for PatternDefaults {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultValueProvider for PatternDefaults {
    fn default_for(&self, field: &str, field_type: FieldType) -> Value {
        self.by_name(field)
            .unwrap_or_else(|| type_default(field_type))
    }
}

/// Zero value of a type.
pub fn type_default(field_type: FieldType) -> Value {
    match field_type {
        FieldType::String => Value::String(String::new()),
        FieldType::Integer => Value::Integer(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Boolean => Value::Boolean(false),
        FieldType::DateTime => Value::DateTime(Utc::now()),
        FieldType::Date => Value::Date(Utc::now().date_naive()),
        FieldType::Array => Value::Array(Vec::new()),
        FieldType::Object => Value::Object(Default::default()),
    }
}
