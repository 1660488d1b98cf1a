pub mod bulk;
pub mod query;

use crate::aggregate::{self, AggregateRequest, AggregateRow};
use crate::cancel::CancellationToken;
use crate::config::StoreConfig;
use crate::convert::infer_type;
use crate::defaults::{DefaultValueProvider, PatternDefaults};
use crate::error::{FlatStoreError, Result};
use crate::lock::{with_retry, FileLock};
use crate::record::Record;
use crate::schema::{CollectionSchema, FieldDefinition, SchemaService};
use crate::table::Table;
use crate::validation::{self, ValidationResult};
use crate::value::{FieldType, Fields, Value};
use indexmap::IndexMap;
use query::{ListResult, QueryOptions};
use std::path::{Path, PathBuf};

/// The main entry point for flatstore.
/// Maps collection names onto `<base_dir>/<name>.<extension>` files and
/// provides the query and mutation operations over them.
pub struct Store {
    config: StoreConfig,
    delimiter: u8,
    schemas: SchemaService,
    defaults: Option<Box<dyn DefaultValueProvider>>,
}

impl Store {
    /// Open a store over the configured base directory. The directory does
    /// not need to exist yet; operations on a missing collection fail with
    /// `CollectionNotFound`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let delimiter = config.delimiter_byte()?;
        let schemas = SchemaService::new(&config.base_dir);
        let defaults: Option<Box<dyn DefaultValueProvider>> = if config.generate_defaults {
            Some(Box::new(PatternDefaults::new()))
        } else {
            None
        };
        log::debug!(
            "Opened store at {} (*.{}, delimiter {:?})",
            config.base_dir.display(),
            config.extension,
            config.delimiter
        );
        Ok(Store {
            config,
            delimiter,
            schemas,
            defaults,
        })
    }

    /// Replace the generator used to back-fill new columns. `None` fills
    /// them with empty cells.
    pub fn set_default_provider(&mut self, provider: Option<Box<dyn DefaultValueProvider>>) {
        self.defaults = provider;
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Resolve a collection name to its file path. Rejects anything that
    /// could land outside the base directory; nothing is touched on disk.
    pub fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        if collection.trim().is_empty() {
            return Err(FlatStoreError::argument("Collection name must not be empty"));
        }
        if collection == ".."
            || collection.contains(['/', '\\', ':'])
            || Path::new(collection).is_absolute()
        {
            return Err(FlatStoreError::Argument(format!(
                "Invalid collection name '{collection}'"
            )));
        }

        let base = self.config.base_dir.as_path();
        let path = base.join(format!("{collection}.{}", self.config.extension));
        if path.parent() != Some(base) {
            return Err(FlatStoreError::Argument(format!(
                "Collection '{collection}' resolves outside the data directory"
            )));
        }
        Ok(path)
    }

    fn existing_path(&self, collection: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        cancel.check()?;
        let path = self.collection_path(collection)?;
        if !path.is_file() {
            return Err(FlatStoreError::CollectionNotFound(collection.to_string()));
        }
        Ok(path)
    }

    fn read_table(&self, path: &Path, cancel: &CancellationToken) -> Result<Table> {
        cancel.check()?;
        Table::read(path, self.delimiter)
    }

    fn write_table(&self, table: &Table, path: &Path, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        table.write(path, self.delimiter)
    }

    /// Run `op` holding the collection's write lock, retrying the whole
    /// closure on lock contention.
    fn locked<T, F>(&self, path: &Path, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        with_retry(&self.config.retry, cancel, || {
            let _lock = FileLock::acquire(path)?;
            op()
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Filter, sort, page and project a collection.
    pub fn list(
        &self,
        collection: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<ListResult> {
        let path = self.existing_path(collection, cancel)?;
        let table = self.read_table(&path, cancel)?;

        let mut matched = Vec::new();
        for record in table.records {
            cancel.check()?;
            if options
                .filter
                .as_ref()
                .map_or(true, |f| f.matches_record(&record))
            {
                matched.push(record);
            }
        }

        let total = matched.len();
        if let Some(sort) = &options.sort {
            query::sort_records(&mut matched, sort);
        }

        let projection = options.fields.as_deref().filter(|f| !f.is_empty());
        let data = matched
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|r| match projection {
                Some(fields) => query::project(r, fields),
                None => r,
            })
            .collect();

        Ok(ListResult {
            data,
            total,
            has_more: query::has_more(options.offset, options.limit, total),
        })
    }

    /// First record with the given id.
    pub fn get(&self, collection: &str, id: &str, cancel: &CancellationToken) -> Result<Record> {
        let path = self.existing_path(collection, cancel)?;
        let table = self.read_table(&path, cancel)?;
        table
            .records
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| FlatStoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    /// Effective schema: header columns with inferred types merged with the
    /// sidecar.
    pub fn get_schema(
        &self,
        collection: &str,
        cancel: &CancellationToken,
    ) -> Result<CollectionSchema> {
        let path = self.existing_path(collection, cancel)?;
        let table = self.read_table(&path, cancel)?;
        self.schemas.resolve(collection, &table)
    }

    /// Names of all collections in the base directory, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let base = &self.config.base_dir;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let escaped = glob::Pattern::escape(&base.to_string_lossy());
        let pattern = format!("{escaped}/*.{}", self.config.extension);
        let mut names: Vec<String> = glob::glob(&pattern)
            .map_err(|e| FlatStoreError::Argument(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Count of each distinct text value of `field`, in first-seen order.
    /// An unknown field gives an empty map.
    pub fn summary(
        &self,
        collection: &str,
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexMap<String, usize>> {
        let path = self.existing_path(collection, cancel)?;
        let table = self.read_table(&path, cancel)?;

        let mut counts = IndexMap::new();
        if !table.has_column(field) {
            return Ok(counts);
        }
        for record in &table.records {
            cancel.check()?;
            let key = record.get(field).map(Value::to_text).unwrap_or_default();
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn aggregate(
        &self,
        collection: &str,
        request: &AggregateRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<AggregateRow>> {
        let path = self.existing_path(collection, cancel)?;
        let table = self.read_table(&path, cancel)?;
        cancel.check()?;
        aggregate::aggregate(&table.records, request)
    }

    /// Check a prospective record against the collection schema without
    /// writing anything.
    pub fn validate(&self, collection: &str, fields: &Fields) -> Result<ValidationResult> {
        let cancel = CancellationToken::new();
        let schema = self.get_schema(collection, &cancel)?;
        let mut prepared = fields.clone();
        validation::apply_defaults(&schema, &mut prepared);
        Ok(validation::validate_record(&schema, &prepared))
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Insert a record with a generated id. A record whose keys fit the
    /// existing header is appended; new keys widen the header and the file
    /// is rewritten.
    pub fn create(
        &self,
        collection: &str,
        fields: Fields,
        cancel: &CancellationToken,
    ) -> Result<Record> {
        let path = self.existing_path(collection, cancel)?;
        let id = self.config.id_strategy.generate();
        let fields = with_id(&id, fields);

        let record = self.locked(&path, cancel, || {
            cancel.check()?;
            let headers = Table::read_headers(&path, self.delimiter)?;
            let fits = fields.keys().all(|k| headers.contains(k));

            if fits && !self.config.validate_on_write {
                let table = Table {
                    headers,
                    records: Vec::new(),
                };
                let record = table.stored(&fields);
                cancel.check()?;
                Table::append(&path, self.delimiter, &table.headers, &record)?;
                return Ok(record);
            }

            let mut table = self.read_table(&path, cancel)?;
            let mut added = Vec::new();
            let record = self.insert_into(collection, &mut table, fields.clone(), &mut added, cancel)?;
            if added.is_empty() {
                cancel.check()?;
                Table::append(&path, self.delimiter, &table.headers, &record)?;
            } else {
                self.write_table(&table, &path, cancel)?;
                self.schemas.add_fields(collection, added)?;
            }
            Ok(record)
        })?;

        log::debug!("Created {collection}/{}", record.id);
        Ok(record)
    }

    /// Merge `patch` into the record with the given id. The id itself is
    /// never overwritten.
    pub fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Fields,
        cancel: &CancellationToken,
    ) -> Result<Record> {
        let path = self.existing_path(collection, cancel)?;

        self.locked(&path, cancel, || {
            let mut table = self.read_table(&path, cancel)?;
            let pos = table
                .position(id)
                .ok_or_else(|| FlatStoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;

            let mut added = Vec::new();
            let record = self.patch_in(collection, &mut table, pos, &patch, &mut added, cancel)?;
            self.write_table(&table, &path, cancel)?;
            self.schemas.add_fields(collection, added)?;
            log::debug!("Updated {collection}/{id}");
            Ok(record)
        })
    }

    pub fn delete(&self, collection: &str, id: &str, cancel: &CancellationToken) -> Result<()> {
        let path = self.existing_path(collection, cancel)?;

        self.locked(&path, cancel, || {
            let mut table = self.read_table(&path, cancel)?;
            let pos = table
                .position(id)
                .ok_or_else(|| FlatStoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            table.records.remove(pos);
            self.write_table(&table, &path, cancel)?;
            log::debug!("Deleted {collection}/{id}");
            Ok(())
        })
    }

    // ── In-memory mutation, shared with bulk ────────────────────────

    /// Add a record (which already carries its id) to `table`, widening the
    /// header for unseen keys. New columns are pushed onto `added`.
    fn insert_into(
        &self,
        collection: &str,
        table: &mut Table,
        mut fields: Fields,
        added: &mut Vec<FieldDefinition>,
        cancel: &CancellationToken,
    ) -> Result<Record> {
        self.prepare(collection, table, &mut fields)?;
        added.extend(self.widen(table, &fields, None, cancel)?);
        let record = table.stored(&fields);
        table.records.push(record.clone());
        Ok(record)
    }

    /// Merge `patch` into the record at `pos`.
    fn patch_in(
        &self,
        collection: &str,
        table: &mut Table,
        pos: usize,
        patch: &Fields,
        added: &mut Vec<FieldDefinition>,
        cancel: &CancellationToken,
    ) -> Result<Record> {
        let mut merged = table.records[pos].fields.clone();
        for (key, value) in patch {
            if key != "id" {
                merged.insert(key.clone(), value.clone());
            }
        }
        self.prepare(collection, table, &mut merged)?;
        added.extend(self.widen(table, &merged, Some(pos), cancel)?);
        let record = table.stored(&merged);
        table.records[pos] = record.clone();
        Ok(record)
    }

    fn prepare(&self, collection: &str, table: &Table, fields: &mut Fields) -> Result<()> {
        if !self.config.validate_on_write {
            return Ok(());
        }
        let schema = self.schemas.resolve(collection, table)?;
        for warning in validation::validate_and_prepare(&schema, fields)? {
            log::warn!("{collection}: {warning}");
        }
        Ok(())
    }

    /// Append a column for every key of `incoming` missing from the header
    /// and back-fill it in every record except `skip`. Returns the new
    /// field definitions, typed from the incoming values.
    fn widen(
        &self,
        table: &mut Table,
        incoming: &Fields,
        skip: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FieldDefinition>> {
        let new_fields: Vec<FieldDefinition> = incoming
            .iter()
            .filter(|(key, _)| !table.has_column(key))
            .map(|(key, value)| {
                FieldDefinition::new(key.clone(), infer_type(value).unwrap_or(FieldType::String))
            })
            .collect();

        for field in &new_fields {
            table.headers.push(field.name.clone());
            for (i, record) in table.records.iter_mut().enumerate() {
                cancel.check()?;
                if Some(i) == skip {
                    continue;
                }
                let value = match &self.defaults {
                    Some(provider) => provider.default_for(&field.name, field.field_type),
                    None => Value::String(String::new()),
                };
                record
                    .fields
                    .insert(field.name.clone(), Value::String(value.to_text()));
            }
            log::debug!("Added column '{}' ({})", field.name, field.field_type);
        }
        Ok(new_fields)
    }
}

/// Field map with `id` first. A caller-supplied id is discarded.
fn with_id(id: &str, fields: Fields) -> Fields {
    let mut out = Fields::with_capacity(fields.len() + 1);
    out.insert("id".to_string(), Value::String(id.to_string()));
    out.extend(fields.into_iter().filter(|(k, _)| k != "id"));
    out
}
