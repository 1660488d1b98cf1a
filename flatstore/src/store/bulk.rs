// Bulk operations - atomic (all-or-nothing) and best-effort modes

use super::{with_id, Store};
use crate::cancel::CancellationToken;
use crate::error::{FlatStoreError, Result};
use crate::table::Table;
use crate::value::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Create,
    Update,
    Delete,
}

impl FromStr for BulkAction {
    type Err = FlatStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(BulkAction::Create),
            "update" => Ok(BulkAction::Update),
            "delete" => Ok(BulkAction::Delete),
            _ => Err(FlatStoreError::Argument(format!(
                "Bulk action must be create, update or delete, got '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationRequest {
    pub action: String,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub records: Vec<Fields>,
    /// Patch applied to every targeted record on update. When absent each
    /// record is its own patch.
    #[serde(default)]
    pub update_data: Option<Fields>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicBulkOutcome {
    pub success: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestEffortBulkOutcome {
    pub success: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BulkResult {
    Atomic(AtomicBulkOutcome),
    BestEffort(BestEffortBulkOutcome),
}

impl BulkResult {
    pub fn success(&self) -> bool {
        match self {
            BulkResult::Atomic(o) => o.success,
            BulkResult::BestEffort(o) => o.success,
        }
    }

    pub fn succeeded(&self) -> usize {
        match self {
            BulkResult::Atomic(o) => o.succeeded,
            BulkResult::BestEffort(o) => o.succeeded,
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            BulkResult::Atomic(o) => o.failed,
            BulkResult::BestEffort(o) => o.failed,
        }
    }
}

impl Store {
    /// Apply one action to many records.
    pub fn bulk(
        &self,
        collection: &str,
        request: &BulkOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<BulkResult> {
        let action: BulkAction = request.action.parse()?;
        if request.records.is_empty() {
            return Err(FlatStoreError::argument("Bulk request has no records"));
        }
        let path = self.existing_path(collection, cancel)?;

        if request.atomic {
            self.bulk_atomic(collection, &path, action, request, cancel)
                .map(BulkResult::Atomic)
        } else {
            self.bulk_best_effort(collection, action, request, cancel)
                .map(BulkResult::BestEffort)
        }
    }

    fn bulk_atomic(
        &self,
        collection: &str,
        path: &std::path::Path,
        action: BulkAction,
        request: &BulkOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<AtomicBulkOutcome> {
        let total = request.records.len();

        let outcome = self.locked(path, cancel, || {
            let mut table = self.read_table(path, cancel)?;
            let mut added = Vec::new();
            let mut ids = Vec::with_capacity(total);

            for (index, item) in request.records.iter().enumerate() {
                cancel.check()?;
                let applied = match action {
                    BulkAction::Create => {
                        let fields = with_id(&self.config.id_strategy.generate(), item.clone());
                        self.insert_into(collection, &mut table, fields, &mut added, cancel)
                            .map(|r| r.id)
                    }
                    BulkAction::Update => target(&table, item).and_then(|(id, pos)| {
                        let patch = request.update_data.as_ref().unwrap_or(item);
                        self.patch_in(collection, &mut table, pos, patch, &mut added, cancel)
                            .map(|_| id)
                    }),
                    BulkAction::Delete => target(&table, item).map(|(id, pos)| {
                        table.records.remove(pos);
                        id
                    }),
                };

                match applied {
                    Ok(id) => ids.push(id),
                    Err(FlatStoreError::Cancelled) => return Err(FlatStoreError::Cancelled),
                    Err(e) => {
                        // Working copy is dropped, nothing reaches the file
                        log::debug!("Atomic bulk on '{collection}' failed at item {index}: {e}");
                        return Ok(AtomicBulkOutcome {
                            success: false,
                            succeeded: 0,
                            failed: total,
                            ids: Vec::new(),
                            error: Some(format!("Item {index} failed; no changes were applied")),
                            failed_index: Some(index),
                            failed_error: Some(e.to_string()),
                        });
                    }
                }
            }

            self.write_table(&table, path, cancel)?;
            self.schemas.add_fields(collection, added)?;
            Ok(AtomicBulkOutcome {
                success: true,
                succeeded: total,
                failed: 0,
                ids,
                error: None,
                failed_index: None,
                failed_error: None,
            })
        })?;

        if outcome.success {
            log::debug!("Atomic bulk on '{collection}' applied {total} item(s)");
        }
        Ok(outcome)
    }

    fn bulk_best_effort(
        &self,
        collection: &str,
        action: BulkAction,
        request: &BulkOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<BestEffortBulkOutcome> {
        let mut results = Vec::with_capacity(request.records.len());

        for (index, item) in request.records.iter().enumerate() {
            cancel.check()?;
            let applied = match action {
                BulkAction::Create => self.create(collection, item.clone(), cancel).map(|r| r.id),
                BulkAction::Update => item_id(item).and_then(|id| {
                    let patch = request.update_data.as_ref().unwrap_or(item);
                    self.update(collection, &id, patch.clone(), cancel)
                        .map_err(missing_key)
                        .map(|_| id)
                }),
                BulkAction::Delete => item_id(item).and_then(|id| {
                    self.delete(collection, &id, cancel).map_err(missing_key).map(|_| id)
                }),
            };

            results.push(match applied {
                Ok(id) => ItemResult {
                    index,
                    id: Some(id),
                    success: true,
                    error: None,
                },
                Err(FlatStoreError::Cancelled) => return Err(FlatStoreError::Cancelled),
                Err(e) => ItemResult {
                    index,
                    id: item_id(item).ok(),
                    success: false,
                    error: Some(e.to_string()),
                },
            });
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        log::debug!("Bulk on '{collection}': {succeeded} succeeded, {failed} failed");
        Ok(BestEffortBulkOutcome {
            success: succeeded > 0,
            succeeded,
            failed,
            results,
        })
    }
}

/// Non-empty `id` of a bulk item.
fn item_id(item: &Fields) -> Result<String> {
    match item.get("id").map(Value::to_text) {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(FlatStoreError::argument("Bulk item requires a non-empty 'id'")),
    }
}

/// Bulk items report a missing record as a missing key, in both modes.
fn missing_key(err: FlatStoreError) -> FlatStoreError {
    match err {
        FlatStoreError::NotFound { id, .. } => FlatStoreError::KeyNotFound { id },
        other => other,
    }
}

/// Id and position of the record a bulk item targets.
fn target(table: &Table, item: &Fields) -> Result<(String, usize)> {
    let id = item_id(item)?;
    match table.position(&id) {
        Some(pos) => Ok((id, pos)),
        None => Err(FlatStoreError::KeyNotFound { id }),
    }
}
