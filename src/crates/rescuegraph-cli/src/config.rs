//! CLI configuration file
//!
//! ```toml
//! [engine]
//! default_durability = "sync"
//! suspension_ttl_secs = 3600
//!
//! [dispatch]
//! max_dispatch_retries = 3
//! shortlist_size = 3
//!
//! [limits]
//! default = 8
//! devices = 2
//!
//! [[places]]
//! name = "Pier 54"
//! lat = 47.6026
//! lng = -122.3393
//!
//! [[llm.endpoints]]
//! name = "primary"
//! scope = "report"
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! ```
//!
//! Every table is optional. After parsing, `[engine]` is overlaid with `RESCUEGRAPH_*`
//! and `[dispatch]` with `RESCUEGRAPH_DISPATCH_*` environment variables.

use anyhow::{Context, Result};
use llm::EndpointConfig;
use rescuegraph_core::{EngineConfig, ENV_PREFIX};
use rescuegraph_prebuilt::{DispatchSettings, GeoPoint, StaticMappingService, DISPATCH_ENV_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tooling::config::ConfigBuilder;
use tooling::rate_limit::DependencyLimits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub dispatch: DispatchSettings,
    pub limits: LimitsConfig,
    /// Named locations the built-in geocoder resolves
    pub places: Vec<PlaceConfig>,
    pub llm: LlmConfig,
}

/// Concurrency caps per external dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_limit")]
    pub default: usize,
    #[serde(flatten)]
    pub dependencies: BTreeMap<String, usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default: default_limit(),
            dependencies: BTreeMap::new(),
        }
    }
}

fn default_limit() -> usize {
    8
}

impl LimitsConfig {
    pub fn to_limits(&self) -> DependencyLimits {
        self.dependencies
            .iter()
            .fold(DependencyLimits::new(self.default), |limits, (name, limit)| {
                limits.with_limit(name.clone(), *limit)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceConfig {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoints: Vec<EndpointConfig>,
}

impl CliConfig {
    /// Parse a TOML document without touching the environment
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration file")
    }

    /// Load `path` if given, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::parse(&text)?
            }
            None => Self::default(),
        };
        base.with_env()
    }

    /// Overlay the environment onto the engine and dispatch tables
    pub fn with_env(mut self) -> Result<Self> {
        self.engine = EngineConfig::layered(self.engine, ENV_PREFIX)?;
        self.dispatch = DispatchSettings::layered(self.dispatch, DISPATCH_ENV_PREFIX)?;
        Ok(self)
    }

    /// Point the engine at a SQLite file, overriding any configured URL
    pub fn with_database(mut self, path: &Path) -> Self {
        self.engine.database_url = Some(sqlite_url(path));
        self
    }

    pub fn mapping_service(&self) -> StaticMappingService {
        self.places
            .iter()
            .fold(StaticMappingService::new(), |mapping, place| {
                mapping.with_place(&place.name, GeoPoint::new(place.lat, place.lng))
            })
    }
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

/// `rescuegraph.toml` in the working directory, if present
pub fn default_config_path() -> Option<PathBuf> {
    let path = PathBuf::from("rescuegraph.toml");
    path.exists().then_some(path)
}
