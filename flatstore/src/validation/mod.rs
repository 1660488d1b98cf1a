use crate::convert::{convert, ConversionStrategy};
use crate::error::{FlatStoreError, Result};
use crate::schema::{CollectionSchema, FieldDefinition};
use crate::value::{Fields, Value};

/// Result of validating a record
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// (field, message) pairs that make the record unacceptable
    pub errors: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate a record's fields against a collection schema.
///
/// Non-nullable fields must be present and non-null; blank text counts as
/// null since that is how an empty cell reads back. A field with a declared
/// default is exempt because `apply_defaults` fills it. Values that do not
/// convert to the declared type are only warnings.
pub fn validate_record(schema: &CollectionSchema, fields: &Fields) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field_def in &schema.fields {
        let value = fields.get(&field_def.name);

        if is_blank(value) {
            if !field_def.nullable && field_def.default.is_none() {
                result.errors.push((
                    field_def.name.clone(),
                    format!("Required field '{}' is missing", field_def.name),
                ));
            }
            continue;
        }

        if let Some(val) = value {
            validate_field_value(field_def, val, &mut result);
        }
    }

    result
}

/// Fill blank fields that declare a default.
pub fn apply_defaults(schema: &CollectionSchema, fields: &mut Fields) {
    for field_def in &schema.fields {
        if is_blank(fields.get(&field_def.name)) {
            if let Some(default) = &field_def.default {
                fields.insert(field_def.name.clone(), default.clone());
            }
        }
    }
}

fn validate_field_value(field_def: &FieldDefinition, value: &Value, result: &mut ValidationResult) {
    if convert(value, field_def.field_type, ConversionStrategy::FailOnError).is_err() {
        result.warnings.push(format!(
            "Field '{}' expected {}, got {} '{}'",
            field_def.name,
            field_def.field_type,
            value.type_name(),
            value
        ));
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Apply defaults and validate. Returns the warnings, or a `Validation`
/// error naming the first offending field.
pub fn validate_and_prepare(schema: &CollectionSchema, fields: &mut Fields) -> Result<Vec<String>> {
    apply_defaults(schema, fields);
    let result = validate_record(schema, fields);

    if let Some((field, message)) = result.errors.into_iter().next() {
        return Err(FlatStoreError::Validation { field, message });
    }

    Ok(result.warnings)
}
