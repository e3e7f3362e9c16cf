//! Configuration management utilities
//!
//! Configuration in rescuegraph is layered: compiled-in defaults, then an optional
//! file (parsed by the binary), then environment variables. [`ConfigBuilder`] captures
//! the last two steps so every config struct loads the same way.
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::config::{ConfigBuilder, get_env_parse_or, build_env_key};
//!
//! #[derive(Clone, Default)]
//! struct PoolConfig {
//!     max_connections: u32,
//! }
//!
//! impl ConfigBuilder for PoolConfig {
//!     fn overlay_env(mut self, prefix: &str) -> tooling::Result<Self> {
//!         self.max_connections =
//!             get_env_parse_or(&build_env_key(prefix, "max_connections"), self.max_connections)?;
//!         Ok(self)
//!     }
//! }
//!
//! let config = PoolConfig::from_env("APP_")?;
//! ```

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{build_env_key, get_env, get_env_parse, get_env_parse_or};
