//! Conversions between SQLite values and export representations.
//!
//! Three targets are supported: JSON (structured bundles), SQL literals
//! (`INSERT` statements) and CSV fields. Blobs have no JSON counterpart,
//! so they travel as `{"$blob": "<hex>"}` objects and are decoded back on
//! import.

use rusqlite::types::{Value, ValueRef};
use serde_json::{Map, Number};

use crate::error::{Result, StoreError};

const BLOB_KEY: &str = "$blob";

/// Converts a column value to JSON.
pub(crate) fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => {
            let mut obj = Map::new();
            obj.insert(BLOB_KEY.to_string(), serde_json::Value::String(hex::encode(bytes)));
            serde_json::Value::Object(obj)
        }
    }
}

/// Converts a bundle JSON value back to a bindable SQLite value.
///
/// Booleans become integers. Arrays and non-blob objects are stored as
/// their JSON text.
pub(crate) fn json_to_value(value: &serde_json::Value) -> Result<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Object(obj) if obj.len() == 1 && obj.contains_key(BLOB_KEY) => {
            let encoded = obj.get(BLOB_KEY).and_then(|v| v.as_str()).unwrap_or_default();
            let bytes = hex::decode(encoded).map_err(|err| {
                StoreError::Validation(format!("invalid blob encoding '{encoded}': {err}"))
            })?;
            Value::Blob(bytes)
        }
        other => Value::Text(other.to_string()),
    })
}

/// Renders a column value as a SQL literal.
pub(crate) fn value_to_sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => {
            let text = f.to_string();
            if text.contains(['.', 'e', 'E']) || !f.is_finite() {
                text
            } else {
                format!("{text}.0")
            }
        }
        ValueRef::Text(bytes) => {
            format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''"))
        }
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    }
}

/// Renders a column value as an RFC 4180 CSV field.
///
/// NULL is an empty field; blobs are written as hex.
pub(crate) fn value_to_csv_field(value: ValueRef<'_>) -> String {
    let raw = match value {
        ValueRef::Null => return String::new(),
        ValueRef::Integer(i) => return i.to_string(),
        ValueRef::Real(f) => return f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(bytes) => hex::encode(bytes),
    };
    csv_escape(&raw)
}

/// Quotes a CSV field when it contains a delimiter, quote or line break.
pub(crate) fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
