//! Idempotent wrapper for external calls
//!
//! Every observable side effect a step performs (routing requests, device commands,
//! model calls) should go through [`EffectScope::call`]. The scope keys each call by
//! `(instance_id, call_site_id, input_hash)`:
//!
//! - on a hit, the stored result is returned and the call is **not** made
//! - on a miss, the call runs; a success is stored (insert-or-ignore) and returned
//! - a failure stores nothing and surfaces as [`EffectError`]
//!
//! Replaying a step after a crash therefore re-issues only the calls that never
//! completed. Calls made outside the scope run again on every replay.
//!
//! ```rust,ignore
//! let eta: RouteEstimate = ctx
//!     .effects()
//!     .call("route:unit-7", &request, || mapping.route(&request))
//!     .await?;
//! ```

use rescuegraph_checkpoint::{EffectRecord, EffectStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EffectError, Result};

/// Hex SHA-256 of the canonical JSON form of a call input
pub fn input_hash<I: Serialize + ?Sized>(input: &I) -> Result<String> {
    Ok(tooling::serialization::content_hash(input)?)
}

/// Effect wrapper bound to one workflow instance
#[derive(Clone)]
pub struct EffectScope {
    instance_id: String,
    store: Arc<dyn EffectStore>,
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl EffectScope {
    pub fn new(instance_id: impl Into<String>, store: Arc<dyn EffectStore>) -> Self {
        Self {
            instance_id: instance_id.into(),
            store,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run `f` at most once per `(call_site_id, input)` for this instance
    ///
    /// `call_site_id` must be stable across runs of the same graph; include a
    /// distinguishing suffix when one step makes several calls of the same kind.
    pub async fn call<I, T, F, Fut, E>(&self, call_site_id: &str, input: &I, f: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let hash = input_hash(input)?;

        if let Some(record) = self
            .store
            .get_effect(&self.instance_id, call_site_id, &hash)
            .await?
        {
            debug!(
                instance_id = %self.instance_id,
                call_site_id,
                "Effect replayed from record"
            );
            return Ok(serde_json::from_value(record.result)?);
        }

        let output = f()
            .await
            .map_err(|e| EffectError::new(call_site_id, e.to_string()))?;

        let record = EffectRecord::new(
            self.instance_id.clone(),
            call_site_id,
            hash.clone(),
            serde_json::to_value(&output)?,
        );

        if self.store.put_effect(&record).await? {
            debug!(instance_id = %self.instance_id, call_site_id, "Effect recorded");
            return Ok(output);
        }

        // Lost an insert race; the first stored result is authoritative
        match self
            .store
            .get_effect(&self.instance_id, call_site_id, &hash)
            .await?
        {
            Some(existing) => Ok(serde_json::from_value(existing.result)?),
            None => Ok(output),
        }
    }

    /// Like [`call`](Self::call), for wrapped calls that already produce [`EffectError`]
    ///
    /// The error keeps its `retryable` flag instead of being flattened to a message.
    pub async fn call_typed<I, T, F, Fut>(&self, call_site_id: &str, input: &I, f: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, EffectError>>,
    {
        let mut failure = None;
        let slot = &mut failure;
        let result = self
            .call(call_site_id, input, move || async move {
                f().await.map_err(|e| {
                    let message = e.message.clone();
                    *slot = Some(e);
                    message
                })
            })
            .await;

        match (result, failure) {
            (Err(_), Some(original)) => Err(original.into()),
            (result, _) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use rescuegraph_checkpoint::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scope(instance: &str, store: &Arc<InMemoryStore>) -> EffectScope {
        EffectScope::new(instance, store.clone() as Arc<dyn EffectStore>)
    }

    #[tokio::test]
    async fn test_repeated_identity_executes_once() {
        let store = Arc::new(InMemoryStore::new());
        let effects = scope("i1", &store);
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value: u32 = effects
                .call("geocode", &json!({"address": "Pier 4"}), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identity_includes_input_and_instance() {
        let store = Arc::new(InMemoryStore::new());
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for (instance, input) in [
            ("i1", json!({"to": "a"})),
            ("i1", json!({"to": "b"})),
            ("i2", json!({"to": "a"})),
            ("i1", json!({"to": "a"})),
        ] {
            let _: serde_json::Value = scope(instance, &store)
                .call("route", &input, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(json!("ok"))
                })
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_is_not_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let effects = scope("i1", &store);

        let err = effects
            .call("dispatch", &"unit-1", || async { Err::<u32, _>("gateway down") })
            .await
            .unwrap_err();
        match err {
            GraphError::Effect(e) => {
                assert_eq!(e.call_site_id, "dispatch");
                assert_eq!(e.message, "gateway down");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.list_effects("i1").await.unwrap().is_empty());

        let value: u32 = effects
            .call("dispatch", &"unit-1", || async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_typed_errors_keep_retryable_flag() {
        let store = Arc::new(InMemoryStore::new());
        let effects = scope("i1", &store);

        let err = effects
            .call_typed("dispatch", &"unit-1", || async {
                Err::<u32, _>(EffectError::new("dispatch", "busy").retryable())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Effect(e) if e.retryable));
    }

    #[test]
    fn test_input_hash_ignores_key_order() {
        assert_eq!(
            input_hash(&json!({"a": 1, "b": 2})).unwrap(),
            input_hash(&json!({"b": 2, "a": 1})).unwrap()
        );
    }
}
