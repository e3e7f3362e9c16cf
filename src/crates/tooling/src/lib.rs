//! Shared helpers for the rescuegraph workspace
//!
//! # Modules
//!
//! - `config` - `ConfigBuilder` trait and environment variable loading
//! - `serialization` - Canonical JSON and content hashing (used for effect identities)
//! - `rate_limit` - Per-dependency concurrency caps for outbound calls
//! - `logging` - Timing helpers and formatters for structured logs

pub mod config;
pub mod logging;
pub mod rate_limit;
pub mod serialization;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// Invalid or unparsable configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A concurrency limiter was closed while a caller waited on it
    #[error("Limiter closed for dependency '{0}'")]
    LimiterClosed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolingError::LimiterClosed("routing".into());
        assert_eq!(err.to_string(), "Limiter closed for dependency 'routing'");
    }
}
