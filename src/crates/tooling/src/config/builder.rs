//! Configuration builder trait

use crate::Result;

/// Common loading contract for configuration structs.
///
/// Implementors only provide [`overlay_env`](ConfigBuilder::overlay_env); values that
/// are absent from the environment keep whatever `self` already holds, so the same
/// method works on top of defaults or on top of a parsed config file.
pub trait ConfigBuilder: Default + Clone {
    /// Check cross-field constraints
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Override fields from `{prefix}{FIELD}` environment variables
    fn overlay_env(self, prefix: &str) -> Result<Self>;

    /// Defaults overlaid with the environment, validated
    fn from_env(prefix: &str) -> Result<Self> {
        let config = Self::default().overlay_env(prefix)?;
        config.validate()?;
        Ok(config)
    }

    /// A file-provided base overlaid with the environment, validated
    fn layered(base: Self, prefix: &str) -> Result<Self> {
        let config = base.overlay_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_env_key, get_env_parse_or};
    use crate::ToolingError;

    #[derive(Debug, Clone, PartialEq)]
    struct WorkerConfig {
        workers: i64,
    }

    impl Default for WorkerConfig {
        fn default() -> Self {
            Self { workers: 4 }
        }
    }

    impl ConfigBuilder for WorkerConfig {
        fn validate(&self) -> Result<()> {
            if self.workers <= 0 {
                return Err(ToolingError::Config("workers must be positive".into()));
            }
            Ok(())
        }

        fn overlay_env(mut self, prefix: &str) -> Result<Self> {
            self.workers = get_env_parse_or(&build_env_key(prefix, "workers"), self.workers)?;
            Ok(self)
        }
    }

    #[test]
    fn test_from_env_uses_defaults_when_unset() {
        let config = WorkerConfig::from_env("TOOLING_BUILDER_UNSET_").unwrap();
        assert_eq!(config, WorkerConfig::default());
    }

    #[test]
    fn test_layered_env_overrides_base() {
        std::env::set_var("TOOLING_BUILDER_LAYERED_WORKERS", "9");
        let config =
            WorkerConfig::layered(WorkerConfig { workers: 2 }, "TOOLING_BUILDER_LAYERED_").unwrap();
        assert_eq!(config.workers, 9);
        std::env::remove_var("TOOLING_BUILDER_LAYERED_WORKERS");
    }

    #[test]
    fn test_validation_runs_after_overlay() {
        std::env::set_var("TOOLING_BUILDER_INVALID_WORKERS", "0");
        let result = WorkerConfig::from_env("TOOLING_BUILDER_INVALID_");
        assert!(matches!(result, Err(ToolingError::Config(_))));
        std::env::remove_var("TOOLING_BUILDER_INVALID_WORKERS");
    }
}
