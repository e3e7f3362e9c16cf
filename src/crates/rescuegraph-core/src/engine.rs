//! Invocation boundary: graph registry, concurrency limits and instance locking
//!
//! [`WorkflowEngine`] is what services and the CLI talk to. It owns the stores, maps
//! graph names to [`CompiledGraph`]s, and enforces the concurrency model:
//!
//! ```text
//!  start / resume / recover
//!        │
//!        ├─► per-instance mutex      one invocation per instance at a time
//!        ├─► cancellation flag       visible to cancel_workflow while in flight
//!        ├─► instance semaphore      at most max_concurrent_instances executing
//!        └─► CompiledGraph::{run, resume, recover}
//! ```
//!
//! Suspended instances hold neither a lock nor a permit.

use dashmap::DashMap;
use rescuegraph_checkpoint::{
    Checkpoint, CheckpointPayload, CheckpointStore, EffectRecord, EffectStore, InMemoryStore,
    InstanceStatus, SqliteStore, StepCursor, SuspensionTicket, WorkflowInstance,
};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::compiled::{
    CancellationFlag, CompiledGraph, ExecutionOptions, RunConfig, RunOutcome, CANCELLED_ERROR,
};
use crate::config::EngineConfig;
use crate::durability::Durability;
use crate::error::{GraphError, Result};
use crate::state::StateRecord;

/// Options for [`WorkflowEngine::start_workflow`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Generated when unset
    pub instance_id: Option<String>,
    /// The engine's default namespace when unset
    pub namespace: Option<String>,
    /// The engine's default durability when unset
    pub durability: Option<Durability>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = Some(durability);
        self
    }
}

/// An instance id, optionally scoped to a namespace
///
/// A scoped lookup of an instance that lives in another namespace is
/// `InstanceNotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub instance_id: String,
    pub namespace: Option<String>,
}

impl InstanceRef {
    pub fn scoped(namespace: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl From<&str> for InstanceRef {
    fn from(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            namespace: None,
        }
    }
}

impl From<String> for InstanceRef {
    fn from(instance_id: String) -> Self {
        Self {
            instance_id,
            namespace: None,
        }
    }
}

/// Result of [`WorkflowEngine::cancel_workflow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The instance was idle and is now failed
    Cancelled,
    /// The instance is executing; it ends `failed` once its current step returns
    Signalled,
}

/// Everything known about an instance, for status queries
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceView {
    pub instance: WorkflowInstance,
    /// State at the latest checkpoint (empty if none was written)
    pub state: StateRecord,
    pub cursor: Option<StepCursor>,
    /// Captured error of a failed instance
    pub error: Option<String>,
    /// Pending ticket of a suspended instance
    pub ticket: Option<SuspensionTicket>,
}

/// Registry and entry point for durable workflows
pub struct WorkflowEngine {
    config: EngineConfig,
    graphs: DashMap<String, Arc<CompiledGraph>>,
    checkpoints: Arc<dyn CheckpointStore>,
    effects: Arc<dyn EffectStore>,
    permits: Semaphore,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cancel_flags: DashMap<String, CancellationFlag>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("graphs", &self.graph_names())
            .field("in_flight", &self.cancel_flags.len())
            .finish()
    }
}

impl WorkflowEngine {
    /// Engine backed by an in-process store
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Engine backed by `store` for both checkpoints and effect records
    pub fn with_store<S>(config: EngineConfig, store: Arc<S>) -> Self
    where
        S: CheckpointStore + EffectStore + 'static,
    {
        Self::with_stores(config, store.clone(), store)
    }

    pub fn with_stores(
        config: EngineConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        effects: Arc<dyn EffectStore>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_instances.max(1));
        Self {
            config,
            graphs: DashMap::new(),
            checkpoints,
            effects,
            permits,
            locks: DashMap::new(),
            cancel_flags: DashMap::new(),
        }
    }

    /// Engine backed by `config.database_url`, or in-process when unset
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        match config.database_url.clone() {
            Some(url) => {
                let store = SqliteStore::connect(&url).await?;
                info!(database_url = %url, "Using SQLite checkpoint store");
                Ok(Self::with_store(config, Arc::new(store)))
            }
            None => Ok(Self::new(config)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Make a graph startable under its name, bound to the engine's stores
    ///
    /// Replaces any graph registered under the same name.
    pub fn register(&self, graph: CompiledGraph) -> Arc<CompiledGraph> {
        let graph = Arc::new(graph.with_stores(self.checkpoints.clone(), self.effects.clone()));
        if self
            .graphs
            .insert(graph.name().to_string(), graph.clone())
            .is_some()
        {
            warn!(graph = %graph.name(), "Replaced registered graph");
        } else {
            info!(graph = %graph.name(), "Registered graph");
        }
        graph
    }

    /// Registered graph names, sorted
    pub fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn graph(&self, name: &str) -> Result<Arc<CompiledGraph>> {
        self.graphs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GraphError::Engine(format!("unknown graph '{}'", name)))
    }

    fn lock_for(&self, instance_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }

    async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| GraphError::Engine("engine is shutting down".to_string()))
    }

    /// Drop the lock entry once nobody else holds or waits on it
    fn release(&self, instance_id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if(instance_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Retire the cancellation flag while still holding the guard, then release
    ///
    /// A canceller either finds the flag before it is removed, and the check below
    /// sees the signal, or finds none and waits for the guard.
    async fn leave(
        &self,
        instance_id: &str,
        guard: OwnedMutexGuard<()>,
        cancel: &CancellationFlag,
        result: Result<RunOutcome>,
    ) -> Result<RunOutcome> {
        self.cancel_flags.remove(instance_id);
        let result = if cancel.is_cancelled() {
            self.settle_cancelled(instance_id, result).await
        } else {
            result
        };
        self.release(instance_id, guard);
        result
    }

    /// A signalled run that ended idle (suspended, rejected or abandoned) is failed here
    async fn settle_cancelled(
        &self,
        instance_id: &str,
        result: Result<RunOutcome>,
    ) -> Result<RunOutcome> {
        match result {
            Ok(outcome) if outcome.status.is_terminal() => Ok(outcome),
            Ok(outcome) => {
                self.cancel_idle(instance_id).await?;
                Ok(RunOutcome {
                    status: InstanceStatus::Failed,
                    suspension: None,
                    error: Some(CANCELLED_ERROR.to_string()),
                    ..outcome
                })
            }
            Err(error) => {
                if let Err(e) = self.cancel_idle(instance_id).await {
                    debug!(error = %e, "Signalled instance left as is");
                }
                Err(error)
            }
        }
    }

    async fn enter(&self, instance_id: &str) -> (OwnedMutexGuard<()>, CancellationFlag) {
        let guard = self.lock_for(instance_id).lock_owned().await;
        let flag = CancellationFlag::new();
        self.cancel_flags
            .insert(instance_id.to_string(), flag.clone());
        (guard, flag)
    }

    async fn load_scoped(&self, instance: &InstanceRef) -> Result<WorkflowInstance> {
        let found = self.checkpoints.get_instance(&instance.instance_id).await?;
        match found {
            Some(row) if instance.namespace.as_ref().map_or(true, |ns| *ns == row.namespace) => {
                Ok(row)
            }
            _ => Err(GraphError::InstanceNotFound(instance.instance_id.clone())),
        }
    }

    fn options(&self, durability: Option<Durability>, cancel: CancellationFlag) -> ExecutionOptions {
        self.config
            .execution_options(durability)
            .with_cancellation(cancel)
    }

    /// Start a new instance of a registered graph
    #[tracing::instrument(skip(self, initial, options), fields(instance_id))]
    pub async fn start_workflow(
        &self,
        graph_name: &str,
        initial: StateRecord,
        options: StartOptions,
    ) -> Result<RunOutcome> {
        let graph = self.graph(graph_name)?;
        let instance_id = options
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::Span::current().record("instance_id", instance_id.as_str());
        let namespace = options
            .namespace
            .unwrap_or_else(|| self.config.default_namespace.clone());

        let (guard, cancel) = self.enter(&instance_id).await;
        let result: Result<RunOutcome> = async {
            let _permit = self.acquire_permit().await?;
            let config = RunConfig {
                instance_id: Some(instance_id.clone()),
                namespace,
                options: self.options(options.durability, cancel.clone()),
            };
            graph.run(initial, config).await
        }
        .await;
        self.leave(&instance_id, guard, &cancel, result).await
    }

    /// Supply the decision for a suspended instance and continue it
    ///
    /// Runs with the durability mode the instance was started with.
    #[tracing::instrument(skip(self, instance, decision), fields(instance_id))]
    pub async fn resume_workflow(
        &self,
        instance: impl Into<InstanceRef>,
        decision: &[String],
    ) -> Result<RunOutcome> {
        let instance = instance.into();
        tracing::Span::current().record("instance_id", instance.instance_id.as_str());
        let (guard, cancel) = self.enter(&instance.instance_id).await;
        let result: Result<RunOutcome> = async {
            let row = self.load_scoped(&instance).await?;
            let graph = self.graph(&row.graph_name)?;
            let _permit = self.acquire_permit().await?;
            let options = self.options(Some(row.durability), cancel.clone());
            graph.resume(&row.instance_id, decision, &options).await
        }
        .await;
        self.leave(&instance.instance_id, guard, &cancel, result).await
    }

    /// Re-enter a `running` instance from its latest checkpoint
    ///
    /// Meant for instances orphaned by a crash or a checkpoint write failure. Calling
    /// it for an instance another process is executing re-runs its current step.
    /// `durability` overrides the mode recorded at start.
    #[tracing::instrument(skip(self, instance), fields(instance_id))]
    pub async fn recover(
        &self,
        instance: impl Into<InstanceRef>,
        durability: Option<Durability>,
    ) -> Result<RunOutcome> {
        let instance = instance.into();
        tracing::Span::current().record("instance_id", instance.instance_id.as_str());
        let (guard, cancel) = self.enter(&instance.instance_id).await;
        let result: Result<RunOutcome> = async {
            let row = self.load_scoped(&instance).await?;
            let graph = self.graph(&row.graph_name)?;
            let _permit = self.acquire_permit().await?;
            let options = self.options(durability.or(Some(row.durability)), cancel.clone());
            graph.recover(&row.instance_id, &options).await
        }
        .await;
        self.leave(&instance.instance_id, guard, &cancel, result).await
    }

    /// Stop an instance
    ///
    /// An idle instance (suspended, or running with no executor) is failed right away
    /// and its ticket dropped. An executing instance is signalled: it stops at the end
    /// of its current step and ends `failed` even if that step suspends. External calls
    /// already in flight are not interrupted.
    #[tracing::instrument(skip(self, instance), fields(instance_id))]
    pub async fn cancel_workflow(
        &self,
        instance: impl Into<InstanceRef>,
    ) -> Result<CancelOutcome> {
        let instance = instance.into();
        tracing::Span::current().record("instance_id", instance.instance_id.as_str());
        let row = self.load_scoped(&instance).await?;
        ensure_cancellable(&row)?;

        let lock = self.lock_for(&row.instance_id);
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                let signalled = self
                    .cancel_flags
                    .get(&row.instance_id)
                    .map(|flag| flag.cancel())
                    .is_some();
                if signalled {
                    info!("Cancellation signalled to running instance");
                    return Ok(CancelOutcome::Signalled);
                }
                // Held by another canceller, or by an executor entering or leaving
                lock.clone().lock_owned().await
            }
        };
        drop(lock);

        let result = self.cancel_idle(&row.instance_id).await;
        self.release(&row.instance_id, guard);
        result.map(|()| CancelOutcome::Cancelled)
    }

    async fn cancel_idle(&self, instance_id: &str) -> Result<()> {
        // Status may have moved while the lock was contended
        let row = self
            .checkpoints
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| GraphError::InstanceNotFound(instance_id.to_string()))?;
        ensure_cancellable(&row)?;

        self.checkpoints.take_ticket(instance_id).await?;
        let latest = self.checkpoints.load_latest(instance_id).await?;
        let (state, cursor, parent) = match latest {
            Some(cp) => (cp.payload.state, cp.payload.cursor, Some(cp.checkpoint_id)),
            None => (serde_json::json!({}), StepCursor::finished(0), None),
        };
        let checkpoint = Checkpoint::new(
            instance_id,
            row.namespace,
            parent,
            CheckpointPayload {
                state,
                cursor,
                status: InstanceStatus::Failed,
                error: Some(CANCELLED_ERROR.to_string()),
                decision: None,
            },
        );
        self.checkpoints
            .save(&checkpoint, InstanceStatus::Failed)
            .await?;
        info!("Idle instance cancelled");
        Ok(())
    }

    /// Status, latest state, cursor, error and pending ticket of an instance
    pub async fn get_instance(&self, instance: impl Into<InstanceRef>) -> Result<InstanceView> {
        let instance = instance.into();
        let row = self.load_scoped(&instance).await?;
        let latest = self.checkpoints.load_latest(&row.instance_id).await?;
        let ticket = self.checkpoints.get_ticket(&row.instance_id).await?;

        let (state, cursor, error) = match latest {
            Some(cp) => (
                StateRecord::from_value(cp.payload.state)?,
                Some(cp.payload.cursor),
                cp.payload.error,
            ),
            None => (StateRecord::new(), None, None),
        };
        Ok(InstanceView {
            instance: row,
            state,
            cursor,
            error,
            ticket,
        })
    }

    /// Retained checkpoint chain, oldest first
    pub async fn history(&self, instance: impl Into<InstanceRef>) -> Result<Vec<Checkpoint>> {
        let row = self.load_scoped(&instance.into()).await?;
        Ok(self.checkpoints.list_chain(&row.instance_id).await?)
    }

    /// Recorded external call results, oldest first
    pub async fn effects(&self, instance: impl Into<InstanceRef>) -> Result<Vec<EffectRecord>> {
        let row = self.load_scoped(&instance.into()).await?;
        Ok(self.effects.list_effects(&row.instance_id).await?)
    }

    pub async fn list_instances(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>> {
        Ok(self.checkpoints.list_instances(namespace, status).await?)
    }
}

fn ensure_cancellable(instance: &WorkflowInstance) -> Result<()> {
    if instance.status.is_terminal() {
        return Err(GraphError::InvalidStatus {
            instance_id: instance.instance_id.clone(),
            status: instance.status,
            expected: "running or suspended",
        });
    }
    Ok(())
}
