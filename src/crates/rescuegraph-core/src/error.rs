//! Error types for graph construction, execution and the engine boundary
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Engine              - misconfiguration: invalid graph, unknown graph name
//! ├── Validation          - rejected input, nothing was mutated
//! │   └── ValidationError { UnknownChoices, EmptyDecision, MissingRequiredKeys, Malformed }
//! ├── Effect              - a wrapped external call failed
//! ├── Persistence         - a checkpoint or effect write failed
//! ├── StepFailed          - a step returned an error (instance is now failed)
//! ├── Suspend             - internal: a step asked to suspend
//! ├── NoPendingSuspension - resume without a live ticket
//! ├── InstanceNotFound / InvalidStatus
//! └── Serialization / Tooling / Custom
//! ```
//!
//! Steps return `Result<StateRecord>`. Any error other than `Suspend` fails the
//! instance, except `Persistence`, which leaves it `running` at its last durable
//! cursor so it can be recovered.

use rescuegraph_checkpoint::{CheckpointError, InstanceStatus};
use thiserror::Error;

use crate::suspend::SuspendRequest;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or running workflows
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph misconfiguration or unknown graph; prevents start
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Effect(#[from] EffectError),

    /// A checkpoint or effect record could not be written or read
    #[error("Persistence error: {0}")]
    Persistence(#[from] CheckpointError),

    /// A step failed; the instance has been marked failed
    #[error("Step '{step}' failed: {error}")]
    StepFailed { step: String, error: String },

    /// A decision function returned a label missing from its branch table
    #[error("Step '{step}' routed to unknown branch '{label}'")]
    UnknownBranch { step: String, label: String },

    /// A required state key was absent
    #[error("Missing state key '{0}'")]
    MissingKey(String),

    /// Raised by [`StepContext::suspend`](crate::StepContext::suspend) and intercepted by the executor
    #[error("Suspension requested")]
    Suspend(Box<SuspendRequest>),

    #[error("No pending suspension for instance {0}")]
    NoPendingSuspension(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Instance {instance_id} is {status}, expected {expected}")]
    InvalidStatus {
        instance_id: String,
        status: InstanceStatus,
        expected: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// Application-defined step error
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn custom(message: impl Into<String>) -> Self {
        GraphError::Custom(message.into())
    }

    /// Errors that leave the instance resumable instead of failing it
    pub fn is_persistence(&self) -> bool {
        matches!(self, GraphError::Persistence(_))
    }
}

/// Input rejected before any state was touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown choice ids: {}", .0.join(", "))]
    UnknownChoices(Vec<String>),

    #[error("decision must contain at least one choice id")]
    EmptyDecision,

    #[error("missing required state keys: {}", .0.join(", "))]
    MissingRequiredKeys(Vec<String>),

    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Failure of a wrapped external call
///
/// Nothing is recorded for a failed call, so a later attempt with the same identity
/// executes again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Effect '{call_site_id}' failed: {message}")]
pub struct EffectError {
    pub call_site_id: String,
    pub message: String,
    /// Whether the caller may reasonably try again
    pub retryable: bool,
}

impl EffectError {
    pub fn new(call_site_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_site_id: call_site_id.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}
