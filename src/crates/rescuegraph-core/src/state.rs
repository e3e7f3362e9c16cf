//! Workflow state record
//!
//! A [`StateRecord`] is an open JSON object shared by every step of an instance. Each
//! step receives the full record and returns a *partial* record; the executor merges
//! the partial into the current state key by key.
//!
//! # Merge semantics
//!
//! Merging is shallow and last-writer-wins. A key present in the partial replaces the
//! key in the state outright; nested objects are not merged.
//!
//! ```rust
//! use rescuegraph_core::StateRecord;
//! use serde_json::json;
//!
//! let mut state = StateRecord::new()
//!     .with("unit", json!({"id": "u1", "fuel": 80}))
//!     .with("error_count", 0);
//!
//! state.merge(StateRecord::new().with("unit", json!({"id": "u2"})));
//!
//! assert_eq!(state.get("unit"), Some(&json!({"id": "u2"})));
//! assert_eq!(state.get_as::<u32>("error_count").unwrap(), Some(0));
//! ```
//!
//! # Required keys
//!
//! `task_id`, `caller_id` and `thread_id` must be present when a workflow starts.
//! They are checked once at entry; steps may assume they exist.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphError, Result, ValidationError};

/// Keys every initial state must carry
pub const REQUIRED_KEYS: [&str; 3] = ["task_id", "caller_id", "thread_id"];

/// JSON object newtype holding workflow state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateRecord(Map<String, Value>);

impl StateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a JSON value, which must be an object
    pub fn from_value(value: Value) -> std::result::Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ValidationError::Malformed(format!(
                "state must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Builder-style insert, for constructing partial records
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert any serializable value
    pub fn set<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Typed read of `key`; `Ok(None)` when absent or null
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Typed read of a key that must be present
    pub fn require_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?
            .ok_or_else(|| GraphError::MissingKey(key.to_string()))
    }

    /// Shallow, last-writer-wins merge of a partial record
    pub fn merge(&mut self, partial: StateRecord) {
        for (key, value) in partial.0 {
            self.0.insert(key, value);
        }
    }

    /// Check that every key in `keys` is present and non-null
    pub fn require_keys(&self, keys: &[&str]) -> std::result::Result<(), ValidationError> {
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| matches!(self.0.get(**key), None | Some(Value::Null)))
            .map(|key| key.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingRequiredKeys(missing))
        }
    }
}

impl From<Map<String, Value>> for StateRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for StateRecord {
    type Error = ValidationError;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<StateRecord> for Value {
    fn from(record: StateRecord) -> Self {
        record.into_value()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
