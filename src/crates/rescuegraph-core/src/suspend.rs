//! Human-in-the-loop suspension requests and decision validation
//!
//! A step that needs a human decision returns [`StepContext::suspend`] with a
//! [`SuspendRequest`]. The executor intercepts it, stores a suspension ticket together
//! with a `suspended` checkpoint, and hands the prompt back to the caller.
//!
//! ```text
//!  step ── ctx.suspend(request) ──► executor ──► ticket + suspended checkpoint
//!                                                       │
//!  caller ◄──────────── prompt_payload, choices ────────┘
//!     │
//!     └── resume(instance_id, ["opt-1"]) ──► validate ──► consume ticket ──► re-enter step
//! ```
//!
//! On re-entry the step sees the validated choices through
//! [`StepContext::decision`] and through the state under the request's decision key.
//!
//! [`StepContext::suspend`]: crate::StepContext::suspend
//! [`StepContext::decision`]: crate::StepContext::decision

use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ValidationError;

/// State key decisions are written under unless the request names another
pub const DEFAULT_DECISION_KEY: &str = "decision";

/// What a step needs from a human before it can continue
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendRequest {
    /// Shown to the human: options, context, a question
    pub payload: Value,
    /// Choice ids a decision may contain
    pub valid_choice_ids: Vec<String>,
    /// State key the accepted decision is injected under
    pub decision_key: String,
    /// How long the ticket stays valid; the engine default applies when unset
    pub ttl: Option<Duration>,
}

impl SuspendRequest {
    pub fn new<I, S>(payload: Value, valid_choice_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payload,
            valid_choice_ids: valid_choice_ids.into_iter().map(Into::into).collect(),
            decision_key: DEFAULT_DECISION_KEY.to_string(),
            ttl: None,
        }
    }

    pub fn with_decision_key(mut self, key: impl Into<String>) -> Self {
        self.decision_key = key.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Check a decision against the offered choices
///
/// Returns the accepted ids, deduplicated in first-occurrence order. An empty decision
/// is rejected, as is any id not offered (every unknown id is reported once).
pub fn validate_decision(
    valid_choice_ids: &[String],
    decision: &[String],
) -> Result<Vec<String>, ValidationError> {
    if decision.is_empty() {
        return Err(ValidationError::EmptyDecision);
    }

    let valid: HashSet<&str> = valid_choice_ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut unknown = Vec::new();
    let mut accepted = Vec::new();

    for id in decision {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if valid.contains(id.as_str()) {
            accepted.push(id.clone());
        } else {
            unknown.push(id.clone());
        }
    }

    if unknown.is_empty() {
        Ok(accepted)
    } else {
        Err(ValidationError::UnknownChoices(unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_accepts_known_ids_and_dedups_in_order() {
        let valid = ids(&["opt-1", "opt-2", "opt-3"]);
        let accepted = validate_decision(&valid, &ids(&["opt-3", "opt-1", "opt-3"])).unwrap();
        assert_eq!(accepted, ids(&["opt-3", "opt-1"]));
    }

    #[test]
    fn test_reports_each_unknown_id_once() {
        let valid = ids(&["opt-1", "opt-2"]);
        let err = validate_decision(&valid, &ids(&["opt-1", "opt-1", "opt-9", "opt-9", "x"]))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownChoices(ids(&["opt-9", "x"])));
    }

    #[test]
    fn test_empty_decision_rejected() {
        let valid = ids(&["opt-1"]);
        assert_eq!(
            validate_decision(&valid, &[]).unwrap_err(),
            ValidationError::EmptyDecision
        );
    }

    #[test]
    fn test_request_builder() {
        let request = SuspendRequest::new(json!({"q": "which?"}), ["a", "b"])
            .with_decision_key("approved")
            .with_ttl(Duration::from_secs(60));
        assert_eq!(request.valid_choice_ids, ids(&["a", "b"]));
        assert_eq!(request.decision_key, "approved");
        assert_eq!(request.ttl, Some(Duration::from_secs(60)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_id() -> impl Strategy<Value = String> {
            prop::sample::select(vec!["u1", "u2", "u3", "u4", "u5"]).prop_map(String::from)
        }

        proptest! {
            #[test]
            fn accepted_ids_are_offered_unique_and_in_first_order(
                valid in prop::collection::vec(arb_id(), 1..5),
                decision in prop::collection::vec(arb_id(), 1..8),
            ) {
                match validate_decision(&valid, &decision) {
                    Ok(accepted) => {
                        let unique: HashSet<&String> = accepted.iter().collect();
                        prop_assert_eq!(unique.len(), accepted.len());
                        prop_assert!(accepted.iter().all(|id| valid.contains(id)));

                        let mut expected: Vec<String> = Vec::new();
                        for id in &decision {
                            if !expected.contains(id) {
                                expected.push(id.clone());
                            }
                        }
                        prop_assert_eq!(accepted, expected);
                    }
                    Err(ValidationError::UnknownChoices(unknown)) => {
                        prop_assert!(!unknown.is_empty());
                        prop_assert!(unknown.iter().all(|id| !valid.contains(id)));
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {}", other),
                }
            }
        }
    }
}
