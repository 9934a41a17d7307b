//! JSON decoding helpers for the wire protocols.
//!
//! Probe agents and broker producers are written in different runtimes and
//! disagree on key casing: the same record may arrive as `responseTimeMs`,
//! `response_time_ms`, or `ResponseTimeMs`. Decoding here is tolerant of all
//! of them. Keys are normalized (lowercased, underscores stripped) before
//! deserialization, and the wire structs declare their deserialize-side field
//! names in that normalized spelling. Serialization always emits the exact
//! camelCase names of the wire contract.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Collapse a JSON object key to its normalized form.
///
/// `responseTimeMs`, `response_time_ms` and `RESPONSETIMEMS` all become
/// `responsetimems`.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalize every object key in a JSON value, recursively.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (normalize_key(&key), normalize_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// Deserialize `T` from a JSON string regardless of the casing of its keys.
pub fn from_json_case_insensitive<T: DeserializeOwned>(input: &str) -> serde_json::Result<T> {
    let value: Value = serde_json::from_str(input)?;
    serde_json::from_value(normalize_keys(value))
}
