// Aggregation engine - group-by with count/sum/avg/min/max

use crate::convert::to_f64;
use crate::error::{FlatStoreError, Result};
use crate::filter::Predicate;
use crate::record::Record;
use crate::value::{Fields, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = FlatStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" => Ok(AggregateFunction::Avg),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            _ => Err(FlatStoreError::Argument(format!(
                "Unsupported aggregate function '{s}'"
            ))),
        }
    }
}

/// One requested aggregate. `function` stays a string until the request
/// runs so an unknown name surfaces as an argument error from the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateSpec {
    pub field: String,
    pub function: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    pub fn new(field: impl Into<String>, function: impl Into<String>) -> Self {
        AggregateSpec {
            field: field.into(),
            function: function.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filter: Option<Predicate>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

/// One output row: group-by values as text, then one entry per aggregate.
pub type AggregateRow = Fields;

struct Group<'a> {
    key_parts: Vec<String>,
    members: Vec<&'a Record>,
}

/// Filter `records`, partition them by the group-by fields and compute the
/// requested aggregates per group. Groups come out in first-seen order.
pub fn aggregate(records: &[Record], request: &AggregateRequest) -> Result<Vec<AggregateRow>> {
    let specs = request
        .aggregates
        .iter()
        .map(|spec| {
            let function: AggregateFunction = spec.function.parse()?;
            let name = spec
                .alias
                .clone()
                .unwrap_or_else(|| format!("{}_{}", spec.field, function.as_str()));
            Ok((spec.field.as_str(), function, name))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        if let Some(filter) = &request.filter {
            if !filter.matches_record(record) {
                continue;
            }
        }

        let key_parts: Vec<String> = request
            .group_by
            .iter()
            .map(|field| match record.get(field) {
                None | Some(Value::Null) => "null".to_string(),
                Some(value) => value.to_text(),
            })
            .collect();
        let key = if key_parts.is_empty() {
            "all".to_string()
        } else {
            key_parts.join("|")
        };

        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
                key_parts,
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push(record);
    }

    let rows = groups
        .iter()
        .map(|group| {
            let mut row = AggregateRow::new();
            for (field, part) in request.group_by.iter().zip(&group.key_parts) {
                row.insert(field.clone(), Value::String(part.clone()));
            }
            for (field, function, name) in &specs {
                row.insert(name.clone(), compute(*function, field, &group.members));
            }
            row
        })
        .collect();

    Ok(rows)
}

fn compute(function: AggregateFunction, field: &str, members: &[&Record]) -> Value {
    // Present, non-null, numeric values only; count ignores the field
    let numbers: Vec<f64> = members
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| !v.is_null())
        .filter_map(to_f64)
        .collect();

    match function {
        AggregateFunction::Count => Value::Integer(members.len() as i64),
        AggregateFunction::Sum => Value::Float(numbers.iter().sum()),
        AggregateFunction::Avg if numbers.is_empty() => Value::Float(0.0),
        AggregateFunction::Avg => Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64),
        AggregateFunction::Min => numbers
            .iter()
            .copied()
            .reduce(f64::min)
            .map_or(Value::Null, Value::Float),
        AggregateFunction::Max => numbers
            .iter()
            .copied()
            .reduce(f64::max)
            .map_or(Value::Null, Value::Float),
    }
}
