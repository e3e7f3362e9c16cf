//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Instance, checkpoint or ticket not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error (connection, query or migration)
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be interpreted
    #[error("Invalid checkpoint data: {0}")]
    Invalid(String),

    /// The checkpoint's parent is not the instance's latest checkpoint
    #[error("Checkpoint conflict for instance {instance_id}: expected parent {expected:?}, got {actual:?}")]
    Conflict {
        instance_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// An instance with this id already exists
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    /// Storage error not covered above
    #[error("Storage error: {0}")]
    Storage(String),
}
