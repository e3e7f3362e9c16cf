//! Endpoint configuration.
//!
//! Endpoints are usually declared in the CLI's TOML file:
//!
//! ```toml
//! [[llm.endpoints]]
//! name = "primary"
//! scope = "report"
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! priority = 0
//! max_concurrency = 4
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tooling::config::get_env;
use tooling::logging::mask_secret;

use crate::error::{LlmError, Result};

/// Configuration for one OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    /// Pool this endpoint belongs to
    #[serde(default = "default_scope")]
    pub scope: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Inline API key; prefer `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,
    /// Concurrent requests allowed against this endpoint.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("priority", &self.priority)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl EndpointConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            scope: default_scope(),
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
            api_key: None,
            priority: 0,
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Inline key, else the named environment variable, else none (local servers)
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => match get_env(var)? {
                Some(key) => Ok(Some(key)),
                None => Err(LlmError::ApiKeyNotFound(format!(
                    "Environment variable: {}",
                    var
                ))),
            },
            None => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LlmError::ConfigError("endpoint name must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(LlmError::ConfigError(format!(
                "endpoint '{}': base_url must be http(s), got '{}'",
                self.name, self.base_url
            )));
        }
        if self.max_concurrency == 0 {
            return Err(LlmError::ConfigError(format!(
                "endpoint '{}': max_concurrency must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_scope() -> String {
    "default".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}
