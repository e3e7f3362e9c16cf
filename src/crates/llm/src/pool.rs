//! Prioritized endpoint pools with failover.
//!
//! A pool holds every endpoint configured for one scope (for example `"report"`).
//! Requests go to the lowest-priority-number endpoint first; a transient failure
//! moves on to the next one, while a permanent failure (bad request, bad key) is
//! returned immediately since another endpoint would reject it too.
//!
//! ```text
//!   complete(req)
//!       │
//!       ├─► primary   (priority 0, limit 4) ── 503 ──┐
//!       │                                          │ retryable: next
//!       ├─► secondary (priority 1, limit 2) ◄──────┘
//!       │        └── ok ──► CompletionResponse
//!       │
//!       └─► every member transient-failed ──► AllEndpointsFailed
//! ```
//!
//! Each member carries its own [`ConcurrencyLimiter`], so a pool never has more
//! requests in flight against an endpoint than `max_concurrency` allows.

use async_trait::async_trait;
use std::sync::Arc;
use tooling::rate_limit::ConcurrencyLimiter;
use tracing::{debug, warn};

use crate::config::EndpointConfig;
use crate::error::{LlmError, Result};
use crate::http::HttpEndpoint;
use crate::types::{CompletionRequest, CompletionResponse, LanguageModel};

struct Member {
    priority: u32,
    model: Arc<dyn LanguageModel>,
    limiter: ConcurrencyLimiter,
}

/// Ordered set of endpoints serving one scope
pub struct EndpointPool {
    scope: String,
    members: Vec<Member>,
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("scope", &self.scope)
            .field("endpoints", &self.endpoint_names())
            .finish()
    }
}

impl EndpointPool {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            members: Vec::new(),
        }
    }

    /// Add a model at `priority`, capped at `max_concurrency` in-flight requests.
    ///
    /// Members with equal priority keep insertion order.
    pub fn add(
        &mut self,
        model: Arc<dyn LanguageModel>,
        priority: u32,
        max_concurrency: usize,
    ) -> &mut Self {
        let limiter = ConcurrencyLimiter::new(model.name(), max_concurrency);
        let position = self
            .members
            .iter()
            .position(|m| m.priority > priority)
            .unwrap_or(self.members.len());
        self.members.insert(
            position,
            Member {
                priority,
                model,
                limiter,
            },
        );
        self
    }

    /// Build an HTTP endpoint from `config` and add it
    pub fn add_endpoint(&mut self, config: EndpointConfig) -> Result<&mut Self> {
        let priority = config.priority;
        let max_concurrency = config.max_concurrency;
        let endpoint = HttpEndpoint::new(config)?;
        Ok(self.add(Arc::new(endpoint), priority, max_concurrency))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names in the order they are tried
    pub fn endpoint_names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.model.name().to_string())
            .collect()
    }

    #[tracing::instrument(skip(self, request), fields(scope = %self.scope, endpoints = self.members.len()))]
    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        if self.members.is_empty() {
            return Err(LlmError::NoEndpoints(self.scope.clone()));
        }

        let mut last_error = None;
        for member in &self.members {
            let name = member.model.name();
            match member.limiter.run(member.model.complete(request)).await? {
                Ok(response) => {
                    debug!(endpoint = name, "Completion succeeded");
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    warn!(endpoint = name, error = %e, "Endpoint failed, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::AllEndpointsFailed {
            scope: self.scope.clone(),
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LanguageModel for EndpointPool {
    fn name(&self) -> &str {
        &self.scope
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        EndpointPool::complete(self, request).await
    }
}
