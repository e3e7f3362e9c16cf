//! Dispatch workflow settings
//!
//! Read from the `[dispatch]` table of the CLI config file and overridden by
//! `RESCUEGRAPH_DISPATCH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tooling::config::{build_env_key, get_env, get_env_parse, get_env_parse_or, ConfigBuilder};
use tooling::ToolingError;

/// Environment prefix for dispatch settings
pub const DISPATCH_ENV_PREFIX: &str = "RESCUEGRAPH_DISPATCH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Retries of the dispatch step after its first failed attempt
    pub max_dispatch_retries: u32,
    /// Top-ranked candidates that get travel estimates and are offered for approval
    pub shortlist_size: usize,
    /// Base delay before a dispatch retry, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Lifetime of the approval ticket; unset uses the engine default
    pub approval_ttl_secs: Option<u64>,
    /// Endpoint pool used to write the incident report
    pub report_scope: String,
    /// Knowledge documents attached to the task at intake
    pub knowledge_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_dispatch_retries: 3,
            shortlist_size: 3,
            retry_backoff_ms: 500,
            approval_ttl_secs: None,
            report_scope: "report".to_string(),
            knowledge_limit: 5,
        }
    }
}

impl DispatchSettings {
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn approval_ttl(&self) -> Option<Duration> {
        self.approval_ttl_secs.map(Duration::from_secs)
    }
}

impl ConfigBuilder for DispatchSettings {
    fn validate(&self) -> tooling::Result<()> {
        if self.shortlist_size == 0 {
            return Err(ToolingError::Config("shortlist_size must be at least 1".to_string()));
        }
        if self.report_scope.trim().is_empty() {
            return Err(ToolingError::Config("report_scope must not be empty".to_string()));
        }
        Ok(())
    }

    fn overlay_env(mut self, prefix: &str) -> tooling::Result<Self> {
        let key = |name: &str| build_env_key(prefix, name);

        self.max_dispatch_retries =
            get_env_parse_or(&key("max_dispatch_retries"), self.max_dispatch_retries)?;
        self.shortlist_size = get_env_parse_or(&key("shortlist_size"), self.shortlist_size)?;
        self.retry_backoff_ms = get_env_parse_or(&key("retry_backoff_ms"), self.retry_backoff_ms)?;
        if let Some(ttl) = get_env_parse(&key("approval_ttl_secs"))? {
            self.approval_ttl_secs = Some(ttl);
        }
        if let Some(scope) = get_env(&key("report_scope"))? {
            self.report_scope = scope;
        }
        self.knowledge_limit = get_env_parse_or(&key("knowledge_limit"), self.knowledge_limit)?;
        Ok(self)
    }
}
