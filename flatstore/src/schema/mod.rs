// Schema service - header inference merged with the persisted JSON sidecar

pub mod parser;
pub mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{CollectionSchema, FieldDefinition};

use crate::convert::infer_type;
use crate::error::Result;
use crate::table::Table;
use crate::value::FieldType;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the sidecar directory under the store's base directory.
pub const SCHEMA_DIR: &str = ".schema";

/// Loads and saves per-collection schema sidecars.
#[derive(Debug, Clone)]
pub struct SchemaService {
    dir: PathBuf,
}

impl SchemaService {
    pub fn new(base_dir: &Path) -> Self {
        SchemaService {
            dir: base_dir.join(SCHEMA_DIR),
        }
    }

    pub fn sidecar_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    /// Load the sidecar for a collection. A missing sidecar is not an error.
    pub fn load(&self, collection: &str) -> Result<Option<CollectionSchema>> {
        let path = self.sidecar_path(collection);
        if !path.exists() {
            return Ok(None);
        }
        parse_schema(&path).map(Some)
    }

    /// Persist a schema as pretty-printed JSON, replacing the file atomically.
    pub fn save(&self, schema: &CollectionSchema) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(schema)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.sidecar_path(&schema.name))
            .map_err(|e| e.error)?;
        Ok(())
    }

    /// Declare new fields in the sidecar, creating it if needed. Fields the
    /// sidecar already declares are left alone. Returns how many were added.
    pub fn add_fields(&self, collection: &str, fields: Vec<FieldDefinition>) -> Result<usize> {
        let existing = self.load(collection)?;
        let created = existing.is_none();
        let mut schema = existing.unwrap_or_else(|| CollectionSchema::new(collection));

        let mut added = 0;
        for field in fields {
            if !schema.has_field(&field.name) {
                schema.fields.push(field);
                added += 1;
            }
        }

        if added > 0 || created {
            self.save(&schema)?;
            if created {
                log::info!("Created schema sidecar for '{collection}' with {added} field(s)");
            } else {
                log::info!("Added {added} field(s) to schema sidecar for '{collection}'");
            }
        }
        Ok(added)
    }

    /// Build the effective schema: header columns with inferred types,
    /// enriched from the sidecar, plus sidecar-only fields at the end.
    pub fn resolve(&self, collection: &str, table: &Table) -> Result<CollectionSchema> {
        let sidecar = self.load(collection)?;
        Ok(merge(collection, table, sidecar.as_ref()))
    }
}

/// One field per header column, typed by the first non-empty cell.
/// Columns without data are strings.
pub fn infer_schema(collection: &str, table: &Table) -> CollectionSchema {
    let fields = table
        .headers
        .iter()
        .map(|header| {
            let field_type = column_type(table, header);
            FieldDefinition::new(header.clone(), field_type.unwrap_or(FieldType::String))
        })
        .collect();

    CollectionSchema {
        name: collection.to_string(),
        fields,
    }
}

fn column_type(table: &Table, header: &str) -> Option<FieldType> {
    table
        .records
        .iter()
        .filter_map(|r| r.get(header))
        .find_map(infer_type)
}

/// Effective schema of a table: `infer_schema` enriched with sidecar
/// metadata. The sidecar supplies nullability and defaults. Its type is
/// used only for columns with no data to infer from; a column whose cells
/// infer as any type, text included, keeps the inferred type.
pub fn merge(collection: &str, table: &Table, sidecar: Option<&CollectionSchema>) -> CollectionSchema {
    let Some(sidecar) = sidecar else {
        return infer_schema(collection, table);
    };

    let mut merged = CollectionSchema::new(collection);
    for header in &table.headers {
        let inferred = column_type(table, header);
        let mut field = FieldDefinition::new(header.clone(), inferred.unwrap_or(FieldType::String));
        if let Some(declared) = sidecar.field(header) {
            field.nullable = declared.nullable;
            field.default = declared.default.clone();
            if inferred.is_none() {
                field.field_type = declared.field_type;
            }
        }
        merged.fields.push(field);
    }

    for declared in &sidecar.fields {
        if !merged.has_field(&declared.name) {
            merged.fields.push(declared.clone());
        }
    }
    merged
}
