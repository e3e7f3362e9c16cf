//! Scope-keyed registry of endpoint pools.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::EndpointConfig;
use crate::error::{LlmError, Result};
use crate::pool::EndpointPool;

/// Pools by scope, shared by every workflow that needs a model.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    pools: BTreeMap<String, Arc<EndpointPool>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one pool per distinct `scope` in `configs`.
    pub fn from_configs(configs: &[EndpointConfig]) -> Result<Self> {
        let mut pools: BTreeMap<String, EndpointPool> = BTreeMap::new();
        for config in configs {
            pools
                .entry(config.scope.clone())
                .or_insert_with(|| EndpointPool::new(config.scope.clone()))
                .add_endpoint(config.clone())?;
        }

        let mut registry = Self::new();
        for (scope, pool) in pools {
            info!(scope = %scope, endpoints = ?pool.endpoint_names(), "Registered endpoint pool");
            registry.insert(pool);
        }
        Ok(registry)
    }

    /// Add or replace the pool for its scope.
    pub fn insert(&mut self, pool: EndpointPool) -> &mut Self {
        self.pools.insert(pool.scope().to_string(), Arc::new(pool));
        self
    }

    pub fn get(&self, scope: &str) -> Option<Arc<EndpointPool>> {
        self.pools.get(scope).cloned()
    }

    /// Pool for `scope`, or `NoEndpoints`.
    pub fn require(&self, scope: &str) -> Result<Arc<EndpointPool>> {
        self.get(scope)
            .filter(|pool| !pool.is_empty())
            .ok_or_else(|| LlmError::NoEndpoints(scope.to_string()))
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
