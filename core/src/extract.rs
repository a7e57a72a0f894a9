//! Field extraction from loosely-typed JSON payloads.
//!
//! The API only returns the fields a request projects, and uses `null` for
//! "nothing to report". Both cases leave the previously known value in place;
//! only a present, non-null value replaces it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Read `key` from `payload`, decoding it with serde.
///
/// Returns `previous` when the key is absent, when its value is `null`, or
/// when the value cannot be decoded as `T`.
pub fn extract<T: DeserializeOwned>(
    payload: &Map<String, Value>,
    key: &str,
    previous: Option<T>,
) -> Option<T> {
    extract_with(payload, key, previous, |value| {
        serde_json::from_value(value.clone()).ok()
    })
}

/// Read `key` from `payload` through `convert`.
///
/// `convert` only sees present, non-null values. A conversion that yields
/// `None` keeps `previous`.
pub fn extract_with<T, F>(
    payload: &Map<String, Value>,
    key: &str,
    previous: Option<T>,
    convert: F,
) -> Option<T>
where
    F: FnOnce(&Value) -> Option<T>,
{
    match payload.get(key) {
        None | Some(Value::Null) => previous,
        Some(value) => match convert(value) {
            Some(converted) => Some(converted),
            None => {
                tracing::debug!(field = key, "ignoring field with unexpected type");
                previous
            }
        },
    }
}

/// Numbers may arrive as JSON numbers or as numeric strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an API timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive ISO-8601 timestamp which is
/// taken to be UTC.
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
