// Value coercion - text cells <-> typed values

use crate::error::{FlatStoreError, Result};
use crate::value::{FieldType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// What to do when a value cannot be represented in the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStrategy {
    /// Fail with a conversion error.
    #[default]
    Cast,
    /// Fail with a conversion error.
    FailOnError,
    /// Swallow the failure and produce null.
    SetNull,
    /// Narrow numbers toward zero; other failures still error.
    Truncate,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%B %d, %Y",
];

/// Convert `value` into `target`, applying `strategy` on failure.
/// Null always converts to null.
pub fn convert(value: &Value, target: FieldType, strategy: ConversionStrategy) -> Result<Value> {
    match try_convert(value, target, strategy) {
        Some(converted) => Ok(converted),
        None if strategy == ConversionStrategy::SetNull => Ok(Value::Null),
        None => Err(FlatStoreError::Conversion {
            value: value.to_text(),
            from: value.type_name().to_string(),
            to: target.to_string(),
        }),
    }
}

/// Parse a raw cell into `target`.
pub fn parse_text(text: &str, target: FieldType, strategy: ConversionStrategy) -> Result<Value> {
    convert(&Value::String(text.to_string()), target, strategy)
}

fn try_convert(value: &Value, target: FieldType, strategy: ConversionStrategy) -> Option<Value> {
    let truncate = strategy == ConversionStrategy::Truncate;

    if value.field_type() == Some(target) {
        return Some(value.clone());
    }

    match (value, target) {
        (Value::Null, _) => Some(Value::Null),
        (_, FieldType::String) => Some(Value::String(value.to_text())),

        (Value::String(s), FieldType::Integer) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            match t.parse::<i64>() {
                Ok(i) => Some(Value::Integer(i)),
                Err(_) if truncate => t.parse::<f64>().ok().and_then(truncate_float),
                Err(_) => None,
            }
        }
        (Value::String(s), FieldType::Float) => parse_float(s).map(Value::Float),
        (Value::String(s), FieldType::Boolean) => Some(Value::Boolean(parse_bool(s))),
        (Value::String(s), FieldType::DateTime) => parse_datetime(s).map(Value::DateTime),
        (Value::String(s), FieldType::Date) => parse_date(s).map(Value::Date),
        (Value::String(s), FieldType::Array) => match serde_json::from_str(s.trim()) {
            Ok(serde_json::Value::Array(items)) => {
                Some(Value::Array(items.into_iter().map(Value::from).collect()))
            }
            _ => None,
        },
        (Value::String(s), FieldType::Object) => match serde_json::from_str(s.trim()) {
            Ok(json @ serde_json::Value::Object(_)) => Some(Value::from(json)),
            _ => None,
        },

        (Value::Integer(i), FieldType::Float) => Some(Value::Float(*i as f64)),
        (Value::Integer(i), FieldType::Boolean) => Some(Value::Boolean(*i != 0)),

        (Value::Float(f), FieldType::Integer) => {
            if f.fract() == 0.0 && f.is_finite() && in_i64_range(*f) {
                Some(Value::Integer(*f as i64))
            } else if truncate {
                truncate_float(*f)
            } else {
                None
            }
        }
        (Value::Float(f), FieldType::Boolean) => Some(Value::Boolean(*f != 0.0)),

        (Value::Boolean(b), FieldType::Integer) => Some(Value::Integer(i64::from(*b))),
        (Value::Boolean(b), FieldType::Float) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),

        (Value::DateTime(dt), FieldType::Date) => Some(Value::Date(dt.date_naive())),
        (Value::Date(d), FieldType::DateTime) => Some(Value::DateTime(midnight_utc(*d))),

        _ => None,
    }
}

fn in_i64_range(f: f64) -> bool {
    f >= i64::MIN as f64 && f <= i64::MAX as f64
}

fn truncate_float(f: f64) -> Option<Value> {
    let t = f.trunc();
    (t.is_finite() && in_i64_range(t)).then(|| Value::Integer(t as i64))
}

/// Parse non-blank numeric text. Rejects `inf`/`NaN` spellings.
pub fn parse_float(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() || !t.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    t.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// true/1/yes are true; anything else, including unrecognized text, is false.
pub fn parse_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    parse_date_only(t).map(midnight_utc)
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    parse_date_only(text).or_else(|| parse_datetime(text).map(|dt| dt.date_naive()))
}

fn parse_date_only(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
}

/// Numeric view of a value: integers, floats and numeric text.
pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => parse_float(s),
        _ => None,
    }
}

/// The narrowest type a value represents. Text cells are inspected, so
/// `"42"` infers as integer. Null and blank text infer nothing.
pub fn infer_type(value: &Value) -> Option<FieldType> {
    let text = match value {
        Value::String(s) => s.trim(),
        other => return other.field_type(),
    };
    if text.is_empty() {
        return None;
    }
    if text.parse::<i64>().is_ok() {
        return Some(FieldType::Integer);
    }
    if parse_float(text).is_some() {
        return Some(FieldType::Float);
    }
    if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
        return Some(FieldType::Boolean);
    }
    if parse_date_only(text).is_some() {
        return Some(FieldType::Date);
    }
    if parse_datetime(text).is_some() {
        return Some(FieldType::DateTime);
    }
    Some(FieldType::String)
}
