// Query options - sorting, paging and projection of list results

use crate::convert::to_f64;
use crate::error::{FlatStoreError, Result};
use crate::filter::Predicate;
use crate::record::Record;
use crate::value::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = FlatStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(FlatStoreError::Argument(format!(
                "Sort direction must be 'asc' or 'desc', got '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Options for `Store::list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub filter: Option<Predicate>,
    pub sort: Option<SortSpec>,
    pub limit: usize,
    pub offset: usize,
    /// Projection. `None` or an empty list returns every field.
    pub fields: Option<Vec<String>>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            filter: None,
            sort: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            fields: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub data: Vec<Record>,
    /// Matches before paging.
    pub total: usize,
    pub has_more: bool,
}

/// Stable sort. Two values compare as numbers when both parse as numbers,
/// otherwise as case-insensitive text. A missing field sorts as empty text.
pub(crate) fn sort_records(records: &mut [Record], sort: &SortSpec) {
    records.sort_by(|a, b| {
        let ordering = compare_cells(a.get(&sort.field), b.get(&sort.field));
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    if let (Some(x), Some(y)) = (a.and_then(to_f64), b.and_then(to_f64)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let text = |v: Option<&Value>| v.map(|v| v.to_text().to_lowercase()).unwrap_or_default();
    text(a).cmp(&text(b))
}

pub(crate) fn has_more(offset: usize, limit: usize, total: usize) -> bool {
    offset.saturating_add(limit) < total
}

/// Keep only the requested fields, first mention wins, unknown names are
/// dropped. `Record::id` is untouched.
pub(crate) fn project(record: Record, fields: &[String]) -> Record {
    let mut projected = Fields::with_capacity(fields.len());
    for name in fields {
        if projected.contains_key(name) {
            continue;
        }
        if let Some(value) = record.fields.get(name) {
            projected.insert(name.clone(), value.clone());
        }
    }
    Record {
        id: record.id,
        fields: projected,
    }
}
