// Filter engine - predicate trees evaluated against a record's fields

use crate::convert::to_f64;
use crate::error::{FlatStoreError, Result};
use crate::record::Record;
use crate::value::{Fields, Value};
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::str::FromStr;

/// Comparison operator of an operator-form predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    StartsWith,
    EndsWith,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
            FilterOperator::Nin => "nin",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "startswith",
            FilterOperator::EndsWith => "endswith",
        }
    }
}

impl FromStr for FilterOperator {
    type Err = FlatStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "eq" => FilterOperator::Eq,
            "ne" => FilterOperator::Ne,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "in" => FilterOperator::In,
            "nin" => FilterOperator::Nin,
            "contains" => FilterOperator::Contains,
            "startswith" => FilterOperator::StartsWith,
            "endswith" => FilterOperator::EndsWith,
            _ => {
                return Err(FlatStoreError::Argument(format!(
                    "Unsupported filter operator '{s}'"
                )))
            }
        })
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every field must equal the given value. Empty matches everything.
    Simple(Fields),
    Operator {
        field: String,
        op: FilterOperator,
        value: Value,
    },
    /// Empty matches everything.
    And(Vec<Predicate>),
    /// Empty matches nothing.
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn simple<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Predicate::Simple(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn op(field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        Predicate::Operator {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Classify a JSON filter by its shape: `and`/`or` keys make a compound,
    /// exactly `field`/`operator`/`value` make an operator form, anything
    /// else is a simple equality map. Each form is tried in that order: an
    /// `and` key that does not hold a list falls through to `or`, and so on
    /// down to the simple map.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let map = json
            .as_object()
            .ok_or_else(|| FlatStoreError::argument("Filter must be a JSON object"))?;

        if let Some(children) = map.get("and") {
            if let Some(children) = compound_children(children)? {
                return Ok(Predicate::And(children));
            }
        }
        if let Some(children) = map.get("or") {
            if let Some(children) = compound_children(children)? {
                return Ok(Predicate::Or(children));
            }
        }
        if map.len() == 3
            && map.contains_key("field")
            && map.contains_key("operator")
            && map.contains_key("value")
        {
            let field = map["field"]
                .as_str()
                .ok_or_else(|| FlatStoreError::argument("Filter 'field' must be a string"))?;
            let op = map["operator"]
                .as_str()
                .ok_or_else(|| FlatStoreError::argument("Filter 'operator' must be a string"))?
                .parse()?;
            return Ok(Predicate::Operator {
                field: field.to_string(),
                op,
                value: Value::from(map["value"].clone()),
            });
        }

        Ok(Predicate::Simple(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect(),
        ))
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Predicate::Simple(expected) => expected.iter().all(|(name, want)| {
                fields
                    .get(name)
                    .map_or(false, |have| values_equal(have, want))
            }),
            Predicate::Operator { field, op, value } => match fields.get(field) {
                Some(have) => evaluate(have, *op, value),
                None => false,
            },
            Predicate::And(children) => children.iter().all(|c| c.matches(fields)),
            Predicate::Or(children) => children.iter().any(|c| c.matches(fields)),
        }
    }

    pub fn matches_record(&self, record: &Record) -> bool {
        self.matches(&record.fields)
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Predicate::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// `Some(children)` for a list (or null, meaning empty), `None` when the
/// compound key holds something else.
fn compound_children(value: &serde_json::Value) -> Result<Option<Vec<Predicate>>> {
    match value {
        serde_json::Value::Null => Ok(Some(Vec::new())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(Predicate::from_json)
            .collect::<Result<Vec<_>>>()
            .map(Some),
        _ => Ok(None),
    }
}

fn evaluate(have: &Value, op: FilterOperator, want: &Value) -> bool {
    match op {
        FilterOperator::Eq => values_equal(have, want),
        FilterOperator::Ne => !values_equal(have, want),
        FilterOperator::Gt => compare(have, want) == Ordering::Greater,
        FilterOperator::Gte => compare(have, want) != Ordering::Less,
        FilterOperator::Lt => compare(have, want) == Ordering::Less,
        FilterOperator::Lte => compare(have, want) != Ordering::Greater,
        FilterOperator::In => in_set(have, want),
        FilterOperator::Nin => !in_set(have, want),
        FilterOperator::Contains => folded(have).contains(&folded(want)),
        FilterOperator::StartsWith => folded(have).starts_with(&folded(want)),
        FilterOperator::EndsWith => folded(have).ends_with(&folded(want)),
    }
}

/// Null-aware equality: direct comparison first, then case-insensitive text.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ if a == b => true,
        _ => folded(a) == folded(b),
    }
}

/// Ordering used by gt/gte/lt/lte: numeric when both sides coerce (null
/// counts as 0), otherwise case-insensitive text.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => folded(a).cmp(&folded(b)),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        other => to_f64(other),
    }
}

fn in_set(have: &Value, set: &Value) -> bool {
    match set {
        Value::Array(items) => items.iter().any(|c| values_equal(have, c)),
        scalar => values_equal(have, scalar),
    }
}

fn folded(value: &Value) -> String {
    value.to_text().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(json: serde_json::Value) -> Fields {
        crate::value::fields_from_json(json)
    }

    fn row() -> Fields {
        // As read from disk: every cell is text
        fields(json!({
            "id": "1", "name": "Alice", "age": "30", "city": "Paris", "note": ""
        }))
    }

    fn parse(json: serde_json::Value) -> Predicate {
        Predicate::from_json(&json).unwrap()
    }

    #[test]
    fn test_classification() {
        assert!(matches!(parse(json!({})), Predicate::Simple(m) if m.is_empty()));
        assert!(matches!(parse(json!({"name": "Alice"})), Predicate::Simple(_)));
        assert!(matches!(
            parse(json!({"field": "age", "operator": "gt", "value": 5})),
            Predicate::Operator { op: FilterOperator::Gt, .. }
        ));
        assert!(matches!(parse(json!({"and": []})), Predicate::And(c) if c.is_empty()));
        assert!(matches!(parse(json!({"or": null})), Predicate::Or(c) if c.is_empty()));
        // Four keys is not operator form
        assert!(matches!(
            parse(json!({"field": "a", "operator": "eq", "value": 1, "x": 2})),
            Predicate::Simple(_)
        ));
    }

    #[test]
    fn test_malformed_compound_falls_through() {
        assert!(matches!(
            parse(json!({"and": 5, "or": [{"name": "Alice"}]})),
            Predicate::Or(c) if c.len() == 1
        ));
        assert!(matches!(parse(json!({"and": "x", "or": 1})), Predicate::Simple(m) if m.len() == 2));
        assert!(matches!(parse(json!({"or": {"name": "Alice"}})), Predicate::Simple(_)));
    }

    #[test]
    fn test_simple_matching() {
        let r = row();
        assert!(parse(json!({})).matches(&r));
        assert!(parse(json!({"name": "alice", "city": "PARIS"})).matches(&r));
        assert!(parse(json!({"age": 30})).matches(&r));
        assert!(!parse(json!({"name": "Bob"})).matches(&r));
        // Missing field fails rather than matching as null
        assert!(!parse(json!({"email": null})).matches(&r));
    }

    #[test]
    fn test_unknown_operator_is_argument_error() {
        for value in [json!(1), json!("x"), json!(null), json!([1, 2])] {
            let err = Predicate::from_json(&json!({
                "field": "age", "operator": "like", "value": value
            }))
            .unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Argument);
        }
        assert!("between".parse::<FilterOperator>().is_err());
        assert_eq!("StartsWith".parse::<FilterOperator>().unwrap(), FilterOperator::StartsWith);
    }

    #[test]
    fn test_numeric_comparisons() {
        let r = row();
        assert!(Predicate::op("age", FilterOperator::Gt, 25).matches(&r));
        assert!(Predicate::op("age", FilterOperator::Gte, "30").matches(&r));
        assert!(Predicate::op("age", FilterOperator::Lt, 30.5).matches(&r));
        assert!(!Predicate::op("age", FilterOperator::Lte, 29).matches(&r));
        // "30" vs 100: numeric, not text ("30" > "100" as text)
        assert!(Predicate::op("age", FilterOperator::Lt, 100).matches(&r));
    }

    #[test]
    fn test_text_fallback_comparison() {
        let r = row();
        assert!(Predicate::op("name", FilterOperator::Gt, "aaron").matches(&r));
        assert!(Predicate::op("name", FilterOperator::Lt, "BOB").matches(&r));
    }

    #[test]
    fn test_null_orders_as_zero() {
        let mut r = row();
        r.insert("score".into(), Value::Null);
        assert!(Predicate::op("score", FilterOperator::Lt, 1).matches(&r));
        assert!(Predicate::op("score", FilterOperator::Gte, 0).matches(&r));
        assert!(Predicate::op("age", FilterOperator::Gt, Value::Null).matches(&r));
    }

    #[test]
    fn test_null_aware_equality() {
        let mut r = row();
        r.insert("score".into(), Value::Null);
        assert!(Predicate::op("score", FilterOperator::Eq, Value::Null).matches(&r));
        assert!(!Predicate::op("note", FilterOperator::Eq, Value::Null).matches(&r));
        assert!(Predicate::op("note", FilterOperator::Ne, Value::Null).matches(&r));
    }

    #[test]
    fn test_in_and_nin() {
        let r = row();
        let set = parse(json!({"field": "city", "operator": "in", "value": ["london", "paris"]}));
        assert!(set.matches(&r));
        let not_in = parse(json!({"field": "city", "operator": "nin", "value": ["London"]}));
        assert!(not_in.matches(&r));
        // A scalar string is a one-element set, not a set of characters
        assert!(Predicate::op("city", FilterOperator::In, "Paris").matches(&r));
        assert!(!Predicate::op("city", FilterOperator::In, "Parisian").matches(&r));
        assert!(Predicate::op("age", FilterOperator::In, Value::Array(vec![Value::Integer(30)]))
            .matches(&r));
    }

    #[test]
    fn test_string_operators() {
        let r = row();
        assert!(Predicate::op("name", FilterOperator::Contains, "LIC").matches(&r));
        assert!(Predicate::op("name", FilterOperator::StartsWith, "al").matches(&r));
        assert!(Predicate::op("name", FilterOperator::EndsWith, "CE").matches(&r));
        assert!(Predicate::op("note", FilterOperator::Contains, Value::Null).matches(&r));
        assert!(!Predicate::op("name", FilterOperator::EndsWith, "x").matches(&r));
    }

    #[test]
    fn test_missing_field_is_false_for_every_operator() {
        let r = row();
        for op in ["eq", "ne", "gt", "lt", "in", "nin", "contains"] {
            let p = parse(json!({"field": "missing", "operator": op, "value": 1}));
            assert!(!p.matches(&r), "{op}");
        }
    }

    #[test]
    fn test_compound() {
        let r = row();
        let p = parse(json!({
            "and": [
                {"city": "Paris"},
                {"or": [
                    {"field": "age", "operator": "lt", "value": 18},
                    {"field": "name", "operator": "startswith", "value": "A"}
                ]}
            ]
        }));
        assert!(p.matches(&r));
        assert!(parse(json!({"and": []})).matches(&r));
        assert!(!parse(json!({"or": []})).matches(&r));
        assert!(!parse(json!({"or": [{"city": "Rome"}, {"name": "Bob"}]})).matches(&r));
    }

    #[test]
    fn test_malformed_compound_degrades_to_simple() {
        let p = parse(json!({"and": "yes", "city": "Paris"}));
        assert!(matches!(p, Predicate::Simple(_)));
        // Record has no "and" field, so the equality map fails
        assert!(!p.matches(&row()));

        let mut r = row();
        r.insert("and".into(), Value::from("yes"));
        assert!(p.matches(&r));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let r = row();
        let p = parse(json!({"field": "age", "operator": "gte", "value": "18"}));
        assert_eq!(p.matches(&r), p.matches(&r));
    }

    #[test]
    fn test_deserialize() {
        let p: Predicate =
            serde_json::from_str(r#"{"field":"age","operator":"eq","value":30}"#).unwrap();
        assert_eq!(p, Predicate::op("age", FilterOperator::Eq, 30));
        let bad: std::result::Result<Predicate, _> =
            serde_json::from_str(r#"{"field":"age","operator":"like","value":30}"#);
        assert!(bad.is_err());
    }
}
