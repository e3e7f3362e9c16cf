//! Language-model endpoints for rescuegraph workflows.
//!
//! Workflow steps that need a model (incident reports, triage summaries) ask an
//! [`EndpointRegistry`] for the pool serving their scope and call it through
//! [`complete_once`], which records the answer as an effect so a replayed step
//! never pays for the same completion twice.
//!
//! # Layout
//!
//! - [`EndpointConfig`] - one OpenAI-compatible endpoint, usually from TOML
//! - [`HttpEndpoint`] - the HTTP client for a single endpoint
//! - [`EndpointPool`] - endpoints of one scope, tried in priority order
//! - [`EndpointRegistry`] - pools by scope
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{complete_once, ChatMessage, CompletionRequest, EndpointConfig, EndpointRegistry};
//!
//! let registry = EndpointRegistry::from_configs(&[
//!     EndpointConfig::new("primary", "https://api.openai.com/v1", "gpt-4o-mini")
//!         .with_scope("report")
//!         .with_api_key_env("OPENAI_API_KEY"),
//!     EndpointConfig::new("local", "http://localhost:11434/v1", "llama3")
//!         .with_scope("report")
//!         .with_priority(1),
//! ])?;
//!
//! // inside a step
//! let pool = registry.require("report")?;
//! let request = CompletionRequest::new(vec![ChatMessage::user("Summarize dispatch")]);
//! let response = complete_once(ctx.effects(), "report.summary", &*pool, &request).await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod pool;
pub mod registry;
pub mod types;

pub use config::EndpointConfig;
pub use error::{into_effect_error, LlmError, Result};
pub use http::HttpEndpoint;
pub use pool::EndpointPool;
pub use registry::EndpointRegistry;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, LanguageModel, Role, Usage};

use rescuegraph_core::EffectScope;

/// Run `request` against `model` as a recorded effect keyed by `call_site_id`.
///
/// The request itself is the effect input, so a changed prompt is a new call.
pub async fn complete_once(
    effects: &EffectScope,
    call_site_id: &str,
    model: &dyn LanguageModel,
    request: &CompletionRequest,
) -> rescuegraph_core::Result<CompletionResponse> {
    effects
        .call_typed(call_site_id, request, || async {
            model
                .complete(request)
                .await
                .map_err(|e| into_effect_error(call_site_id, e))
        })
        .await
}
