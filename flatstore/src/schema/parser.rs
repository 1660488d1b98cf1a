use crate::convert::{convert, ConversionStrategy};
use crate::error::Result;
use super::types::CollectionSchema;
use std::path::Path;

/// Parse a sidecar file into a CollectionSchema
pub fn parse_schema(path: &Path) -> Result<CollectionSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a sidecar JSON string into a CollectionSchema.
///
/// JSON has no date type, so defaults are converted to their field's
/// declared type after parsing. A default that does not convert is kept
/// as written.
pub fn parse_schema_str(content: &str) -> Result<CollectionSchema> {
    let mut schema: CollectionSchema = serde_json::from_str(content)?;
    for field in &mut schema.fields {
        let Some(default) = field.default.take() else {
            continue;
        };
        field.default = Some(
            match convert(&default, field.field_type, ConversionStrategy::Cast) {
                Ok(typed) => typed,
                Err(e) => {
                    log::warn!("Schema '{}': default of '{}' kept as-is: {e}", schema.name, field.name);
                    default
                }
            },
        );
    }
    Ok(schema)
}
