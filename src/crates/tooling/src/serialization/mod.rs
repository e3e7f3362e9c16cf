//! Canonical JSON and content hashing
//!
//! Effect records are keyed by a hash of the call input, so the same logical input
//! must always produce the same bytes regardless of how the caller built its maps.
//! [`stable_json_string`] sorts object keys recursively; [`content_hash`] runs that
//! output through SHA-256.

use crate::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize a value to JSON with object keys sorted at every depth
///
/// # Example
///
/// ```rust
/// use tooling::serialization::stable_json_string;
/// use serde_json::json;
///
/// let a = stable_json_string(&json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
/// assert_eq!(a, r#"{"a":{"c":3,"d":2},"b":1}"#);
/// ```
pub fn stable_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(value))?)
}

/// Hex-encoded SHA-256 of the canonical JSON form of `value`
///
/// # Example
///
/// ```rust
/// use tooling::serialization::content_hash;
/// use serde_json::json;
///
/// let h1 = content_hash(&json!({"lat": 1.0, "lng": 2.0})).unwrap();
/// let h2 = content_hash(&json!({"lng": 2.0, "lat": 1.0})).unwrap();
/// assert_eq!(h1, h2);
/// assert_eq!(h1.len(), 64);
/// ```
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = stable_json_string(value)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Shorten long strings inside a JSON value, for log output
///
/// Strings longer than `max_len` characters are cut and suffixed with `...`.
pub fn truncate_json(value: &Value, max_len: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_len => {
            let mut cut: String = s.chars().take(max_len).collect();
            cut.push_str("...");
            Value::String(cut)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| truncate_json(v, max_len)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_json(v, max_len)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
