//! CompiledGraph: the executable form of a [`StateGraph`](crate::StateGraph)
//!
//! A compiled graph runs instances one step at a time against a pair of stores:
//!
//! ```text
//!            run / resume / recover
//!                     │
//!                     ▼
//!   ┌───────────────────────────────────┐
//!   │ execution loop                    │      ┌──────────────────┐
//!   │  cancel? ─► step ─► merge ─► route│─────►│ CheckpointStore  │
//!   │     ▲                       │     │      └──────────────────┘
//!   │     └──── checkpoint ◄──────┘     │      ┌──────────────────┐
//!   │  steps call ctx.effects() ────────┼─────►│ EffectStore      │
//!   └───────────────────────────────────┘      └──────────────────┘
//! ```
//!
//! # Execution modes
//!
//! - [`run`](CompiledGraph::run) starts a new instance from an initial state
//! - [`resume`](CompiledGraph::resume) continues a suspended instance with a decision
//! - [`recover`](CompiledGraph::recover) re-enters a `running` instance (for example
//!   after a crash) from its latest checkpoint
//!
//! All three return a [`RunOutcome`]. A step failure is an outcome (`failed`), not an
//! `Err`; `Err` means the call itself was rejected or persistence failed.
//!
//! Calls for the same instance must not overlap. [`WorkflowEngine`](crate::WorkflowEngine)
//! serializes them with a per-instance lock.

mod execution;
mod types;

pub use execution::{CANCELLED_ERROR, EXPIRED_ERROR};
pub use types::{CancellationFlag, ExecutionOptions, RunConfig, RunOutcome, DEFAULT_NAMESPACE};

use rescuegraph_checkpoint::{CheckpointStore, EffectStore, InMemoryStore};
use std::sync::Arc;

use crate::graph::Graph;

/// A validated graph bound to its stores
#[derive(Clone)]
pub struct CompiledGraph {
    name: String,
    graph: Arc<Graph>,
    checkpoints: Arc<dyn CheckpointStore>,
    effects: Arc<dyn EffectStore>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("steps", &self.graph.steps.len())
            .field("entry", &self.graph.entry)
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(name: String, graph: Graph) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            name,
            graph: Arc::new(graph),
            checkpoints: store.clone(),
            effects: store,
        }
    }

    /// Use one backend for both checkpoints and effect records
    pub fn with_store<S>(self, store: Arc<S>) -> Self
    where
        S: CheckpointStore + EffectStore + 'static,
    {
        Self {
            checkpoints: store.clone(),
            effects: store,
            ..self
        }
    }

    pub fn with_stores(
        self,
        checkpoints: Arc<dyn CheckpointStore>,
        effects: Arc<dyn EffectStore>,
    ) -> Self {
        Self {
            checkpoints,
            effects,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub fn effect_store(&self) -> &Arc<dyn EffectStore> {
        &self.effects
    }
}
