//! Concurrency limits for outbound dependencies
//!
//! Every external service a workflow touches (routing, geocoding, device gateway,
//! language models) gets its own cap on in-flight calls. A slow dependency then
//! backs up only the steps that use it.
//!
//! ```text
//!   step ──► DependencyLimits::run("routing", call)
//!                │
//!                ├── "routing"  ─► Semaphore(4)
//!                ├── "geocode"  ─► Semaphore(8)
//!                └── <other>    ─► Semaphore(default)
//! ```

use crate::{Result, ToolingError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Cap on concurrent calls to a single dependency
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    name: String,
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// A limiter allowing `limit` concurrent holders (minimum 1)
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name: name.into(),
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ToolingError::LimiterClosed(self.name.clone()))
    }

    /// Run `fut` while holding a permit
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }
}

/// Registry of per-dependency limiters
///
/// Dependencies without an explicit limit share no permits with each other; each
/// gets its own limiter sized to the default the first time it is used.
#[derive(Clone, Debug)]
pub struct DependencyLimits {
    default_limit: usize,
    limiters: Arc<RwLock<HashMap<String, ConcurrencyLimiter>>>,
}

impl Default for DependencyLimits {
    fn default() -> Self {
        Self::new(8)
    }
}

impl DependencyLimits {
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit: default_limit.max(1),
            limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set an explicit limit for `dependency`
    pub fn with_limit(self, dependency: impl Into<String>, limit: usize) -> Self {
        let dependency = dependency.into();
        if let Ok(mut limiters) = self.limiters.write() {
            limiters.insert(dependency.clone(), ConcurrencyLimiter::new(dependency, limit));
        }
        self
    }

    /// Limiter for `dependency`, created with the default limit if absent
    pub fn limiter(&self, dependency: &str) -> ConcurrencyLimiter {
        if let Ok(limiters) = self.limiters.read() {
            if let Some(limiter) = limiters.get(dependency) {
                return limiter.clone();
            }
        }

        match self.limiters.write() {
            Ok(mut limiters) => limiters
                .entry(dependency.to_string())
                .or_insert_with(|| ConcurrencyLimiter::new(dependency, self.default_limit))
                .clone(),
            // A poisoned map still hands out a working, if unshared, limiter
            Err(_) => ConcurrencyLimiter::new(dependency, self.default_limit),
        }
    }

    /// Run `fut` under the limit for `dependency`
    pub async fn run<F, T>(&self, dependency: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let limiter = self.limiter(dependency);
        tracing::trace!(
            dependency,
            available = limiter.available(),
            limit = limiter.limit(),
            "Acquiring dependency permit"
        );
        limiter.run(fut).await
    }
}
