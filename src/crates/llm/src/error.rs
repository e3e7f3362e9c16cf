//! Error types for language-model endpoints.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling language-model endpoints.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Endpoint unavailable (5xx, connection refused).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid response from the endpoint.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Non-transient error reported by the endpoint.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No pool is registered for the scope, or the pool is empty.
    #[error("No endpoints for scope '{0}'")]
    NoEndpoints(String),

    /// Every endpoint in the pool failed with a transient error.
    #[error("All endpoints for scope '{scope}' failed; last error: {last_error}")]
    AllEndpointsFailed { scope: String, last_error: String },
}

impl LlmError {
    /// Check if this error is transient, so another endpoint may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::HttpError(_)
                | LlmError::ServiceUnavailable(_)
                | LlmError::Timeout(_)
                | LlmError::RateLimitExceeded(_)
                | LlmError::AllEndpointsFailed { .. }
        )
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::AuthenticationError(_) | LlmError::ApiKeyNotFound(_)
        )
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

impl From<tooling::ToolingError> for LlmError {
    fn from(err: tooling::ToolingError) -> Self {
        LlmError::ConfigError(err.to_string())
    }
}

/// Surface an LLM failure as a failed effect, keeping its retryability.
pub fn into_effect_error(call_site_id: &str, err: LlmError) -> rescuegraph_core::EffectError {
    let retryable = err.is_retryable();
    let effect = rescuegraph_core::EffectError::new(call_site_id, err.to_string());
    if retryable {
        effect.retryable()
    } else {
        effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Timeout("30s".into()).is_retryable());
        assert!(LlmError::RateLimitExceeded("slow down".into()).is_retryable());
        assert!(LlmError::ServiceUnavailable("502".into()).is_retryable());
        assert!(!LlmError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!LlmError::InvalidRequest("no messages".into()).is_retryable());
        assert!(LlmError::ApiKeyNotFound("KEY".into()).is_auth_error());
    }

    #[test]
    fn test_effect_error_keeps_retryable_flag() {
        let effect = into_effect_error("summary", LlmError::Timeout("60s".into()));
        assert!(effect.retryable);
        assert_eq!(effect.call_site_id, "summary");

        let effect = into_effect_error("summary", LlmError::ProviderError("bad".into()));
        assert!(!effect.retryable);
    }
}
