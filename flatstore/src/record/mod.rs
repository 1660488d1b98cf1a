// Record - one row of a collection

use crate::value::{Fields, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single record. `id` is duplicated in `fields["id"]` for as long as
/// the record carries its full field map; projection may drop it from
/// `fields`, but `id` stays populated.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Record {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = self.fields.keys().filter(|k| k.as_str() != "id").count();
        let mut map = serializer.serialize_map(Some(extra + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (key, value) in &self.fields {
            if key != "id" {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}
