//! Engine configuration
//!
//! Loaded from defaults, an optional `[engine]` table of a TOML file, and
//! `RESCUEGRAPH_*` environment variables, in that order of precedence (environment
//! wins):
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RESCUEGRAPH_MAX_CONCURRENT_INSTANCES` | `max_concurrent_instances` |
//! | `RESCUEGRAPH_DEFAULT_DURABILITY` | `default_durability` |
//! | `RESCUEGRAPH_SUSPENSION_TTL_SECS` | `suspension_ttl_secs` |
//! | `RESCUEGRAPH_CHECKPOINT_RETENTION` | `checkpoint_retention` |
//! | `RESCUEGRAPH_DATABASE_URL` | `database_url` |
//! | `RESCUEGRAPH_DEFAULT_NAMESPACE` | `default_namespace` |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tooling::config::{build_env_key, get_env, get_env_parse, get_env_parse_or, ConfigBuilder};
use tooling::ToolingError;

use crate::compiled::{ExecutionOptions, DEFAULT_NAMESPACE};
use crate::durability::Durability;

/// Environment prefix for engine settings
pub const ENV_PREFIX: &str = "RESCUEGRAPH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instances executing at once; suspended instances do not count
    pub max_concurrent_instances: usize,
    pub default_durability: Durability,
    /// Default ticket lifetime; unset means tickets never expire
    pub suspension_ttl_secs: Option<u64>,
    /// Checkpoints kept per completed instance; unset keeps the full chain
    pub checkpoint_retention: Option<usize>,
    /// `sqlite://path` or `:memory:`; unset uses the in-process store
    pub database_url: Option<String>,
    pub default_namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_instances: 64,
            default_durability: Durability::Sync,
            suspension_ttl_secs: None,
            checkpoint_retention: None,
            database_url: None,
            default_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn suspension_ttl(&self) -> Option<Duration> {
        self.suspension_ttl_secs.map(Duration::from_secs)
    }

    /// Execution options for one invocation, with `durability` overriding the default
    pub fn execution_options(&self, durability: Option<Durability>) -> ExecutionOptions {
        ExecutionOptions {
            durability: durability.unwrap_or(self.default_durability),
            suspension_ttl: self.suspension_ttl(),
            checkpoint_retention: self.checkpoint_retention,
            ..ExecutionOptions::default()
        }
    }
}

impl ConfigBuilder for EngineConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.max_concurrent_instances == 0 {
            return Err(ToolingError::Config(
                "max_concurrent_instances must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_retention == Some(0) {
            return Err(ToolingError::Config(
                "checkpoint_retention must keep at least 1 checkpoint".to_string(),
            ));
        }
        if self.default_namespace.trim().is_empty() {
            return Err(ToolingError::Config("default_namespace must not be empty".to_string()));
        }
        Ok(())
    }

    fn overlay_env(mut self, prefix: &str) -> tooling::Result<Self> {
        let key = |name: &str| build_env_key(prefix, name);

        self.max_concurrent_instances = get_env_parse_or(
            &key("max_concurrent_instances"),
            self.max_concurrent_instances,
        )?;
        self.default_durability =
            get_env_parse_or(&key("default_durability"), self.default_durability)?;
        if let Some(ttl) = get_env_parse(&key("suspension_ttl_secs"))? {
            self.suspension_ttl_secs = Some(ttl);
        }
        if let Some(keep) = get_env_parse(&key("checkpoint_retention"))? {
            self.checkpoint_retention = Some(keep);
        }
        if let Some(url) = get_env(&key("database_url"))? {
            self.database_url = Some(url);
        }
        if let Some(namespace) = get_env(&key("default_namespace"))? {
            self.default_namespace = namespace;
        }
        Ok(self)
    }
}
