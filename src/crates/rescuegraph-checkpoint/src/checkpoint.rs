//! Persisted data model: instances, checkpoints, effect records and suspension tickets
//!
//! Everything in this module is plain serde data. The engine in `rescuegraph-core`
//! decides *when* these records are written; the stores in this crate only decide
//! *how*.
//!
//! # Checkpoint chain
//!
//! ```text
//! WorkflowInstance (instance_id = "inc-42", status = suspended)
//!        │
//!        ├── cp-1  parent = None    cursor = allocate         status = running
//!        ├── cp-2  parent = cp-1    cursor = estimate_travel  status = running
//!        └── cp-3  parent = cp-2    cursor = approve          status = suspended   ◄─ latest
//!
//! SuspensionTicket (instance_id = "inc-42", step = approve, choices = [unit-a, unit-b])
//! ```
//!
//! Checkpoints are immutable and insert-only. The instance row is the only value that
//! changes, and stores update it in the same transaction as each checkpoint insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::CheckpointError;

/// Current time at the millisecond precision the stores persist
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    /// Completed and failed instances never execute again
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "suspended" => Ok(InstanceStatus::Suspended),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(CheckpointError::Invalid(format!("unknown instance status '{}'", other))),
        }
    }
}

/// When intermediate checkpoints reach the store
///
/// Recorded on the instance so a resumed or recovered run keeps the mode it started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    #[default]
    Sync,
    Async,
    Exit,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Sync => "sync",
            Durability::Async => "async",
            Durability::Exit => "exit",
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(Durability::Sync),
            "async" => Ok(Durability::Async),
            "exit" => Ok(Durability::Exit),
            other => Err(format!(
                "unknown durability mode '{}' (expected sync, async or exit)",
                other
            )),
        }
    }
}

/// One execution of a named graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub namespace: String,
    pub graph_name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub durability: Durability,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// A new `running` instance stamped with the current time
    pub fn new(
        instance_id: impl Into<String>,
        namespace: impl Into<String>,
        graph_name: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            instance_id: instance_id.into(),
            namespace: namespace.into(),
            graph_name: graph_name.into(),
            status: InstanceStatus::Running,
            durability: Durability::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

/// Where execution resumes from
///
/// `next_step` is the step that has not yet completed. For a suspended instance it is
/// the suspending step; for a completed one it is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCursor {
    pub next_step: Option<String>,
    /// Number of steps completed so far
    pub step_index: u64,
}

impl StepCursor {
    pub fn at(step: impl Into<String>, step_index: u64) -> Self {
        Self {
            next_step: Some(step.into()),
            step_index,
        }
    }

    pub fn finished(step_index: u64) -> Self {
        Self {
            next_step: None,
            step_index,
        }
    }
}

/// A human decision waiting to be consumed by the step that suspended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// State key the choices were injected under
    pub key: String,
    /// Validated choice ids, deduplicated in first-occurrence order
    pub choice_ids: Vec<String>,
}

/// Serialized contents of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// The full state record as a JSON object
    pub state: Value,
    pub cursor: StepCursor,
    pub status: InstanceStatus,
    /// Captured error message for failed instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Decision accepted by a resume but not yet consumed by its step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

/// Immutable snapshot of an instance at a step boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub instance_id: String,
    pub parent_checkpoint_id: Option<String>,
    pub namespace: String,
    pub payload: CheckpointPayload,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A new checkpoint with a fresh id
    pub fn new(
        instance_id: impl Into<String>,
        namespace: impl Into<String>,
        parent_checkpoint_id: Option<String>,
        payload: CheckpointPayload,
    ) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            parent_checkpoint_id,
            namespace: namespace.into(),
            payload,
            created_at: now_millis(),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.payload.status
    }
}

/// Stored outcome of a wrapped external call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub instance_id: String,
    pub call_site_id: String,
    /// Hex SHA-256 of the canonical call input
    pub input_hash: String,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

impl EffectRecord {
    pub fn new(
        instance_id: impl Into<String>,
        call_site_id: impl Into<String>,
        input_hash: impl Into<String>,
        result: Value,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            call_site_id: call_site_id.into(),
            input_hash: input_hash.into(),
            result,
            completed_at: now_millis(),
        }
    }
}

/// A pending request for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionTicket {
    pub instance_id: String,
    /// The step that suspended and will be re-entered on resume
    pub step: String,
    pub prompt_payload: Value,
    pub valid_choice_ids: Vec<String>,
    pub decision_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SuspensionTicket {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Suspended,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("paused".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(!InstanceStatus::Suspended.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_payload_omits_empty_optionals() {
        let payload = CheckpointPayload {
            state: json!({"task_id": "t1"}),
            cursor: StepCursor::at("allocate", 1),
            status: InstanceStatus::Running,
            error: None,
            decision: None,
        };
        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("error").is_none());
        assert!(encoded.get("decision").is_none());
        assert_eq!(encoded["status"], "running");
        assert_eq!(encoded["cursor"]["next_step"], "allocate");
    }

    #[test]
    fn test_ticket_expiry() {
        let now = Utc::now();
        let mut ticket = SuspensionTicket {
            instance_id: "i".into(),
            step: "approve".into(),
            prompt_payload: json!({}),
            valid_choice_ids: vec!["a".into()],
            decision_key: "decision".into(),
            created_at: now,
            expires_at: None,
        };
        assert!(!ticket.is_expired_at(now + Duration::days(365)));

        ticket.expires_at = Some(now + Duration::seconds(30));
        assert!(!ticket.is_expired_at(now));
        assert!(ticket.is_expired_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_new_checkpoints_get_distinct_ids() {
        let payload = CheckpointPayload {
            state: json!({}),
            cursor: StepCursor::finished(0),
            status: InstanceStatus::Completed,
            error: None,
            decision: None,
        };
        let a = Checkpoint::new("i", "default", None, payload.clone());
        let b = Checkpoint::new("i", "default", None, payload);
        assert_ne!(a.checkpoint_id, b.checkpoint_id);
    }
}
