//! Error Types - Dispatch Workflow Errors
//!
//! [`DispatchError`] covers the collaborators the rescue-dispatch steps call.
//! Device failures keep their own type, [`DeviceError`], so the gateway can report
//! whether a retry could succeed.
//!
//! Steps return [`rescuegraph_core::Result`], so a `DispatchError` converts into a
//! [`GraphError`] with `?`. Graph errors pass through unchanged.

use rescuegraph_core::GraphError;
use thiserror::Error;
use tooling::ToolingError;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Typed failure reported by a device-command gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The unit refused the command (busy, out of service)
    #[error("Unit '{unit_id}' rejected the command: {reason}")]
    Rejected { unit_id: String, reason: String },

    /// The gateway could not reach the unit
    #[error("Unit '{0}' is unreachable")]
    Unreachable(String),

    /// No acknowledgment arrived in time
    #[error("Unit '{0}' did not acknowledge in time")]
    Timeout(String),
}

impl DeviceError {
    /// Whether sending the same command again may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeviceError::Rejected { .. })
    }
}

/// Errors raised by dispatch steps and their collaborators
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Task description in the state is missing or malformed
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Geocoding or routing failed
    #[error("Mapping service error: {0}")]
    Mapping(String),

    /// Knowledge store query failed
    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    /// Device gateway failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Concurrency limiter failure
    #[error("Tooling error: {0}")]
    Tooling(#[from] ToolingError),

    /// Graph error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl From<DispatchError> for GraphError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Graph(inner) => inner,
            DispatchError::Serialization(inner) => GraphError::Serialization(inner),
            other => GraphError::custom(other.to_string()),
        }
    }
}
