//! Library half of the `rescuegraph` binary: configuration loading and command
//! handlers, kept out of `main` so they can be tested.

pub mod app;
pub mod config;

pub use app::{outcome_json, App, IncidentFile};
pub use config::{CliConfig, LimitsConfig, LlmConfig, PlaceConfig};
