#![allow(dead_code)]

use async_trait::async_trait;
use rescuegraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, EffectRecord, EffectStore, InMemoryStore,
    InstanceStatus, SuspensionTicket, WorkflowInstance,
};
use rescuegraph_core::{StateGraph, StateRecord, SuspendRequest, END};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub fn initial_state() -> StateRecord {
    StateRecord::new()
        .with("task_id", "task-1")
        .with("caller_id", "caller-1")
        .with("thread_id", "thread-1")
}

/// Holds the first caller to reach it until the test opens it
#[derive(Clone, Default)]
pub struct Gate {
    pub reached: Arc<Notify>,
    pub open: Arc<Notify>,
    passed: Arc<AtomicBool>,
}

impl Gate {
    async fn pass(&self) {
        if self.passed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reached.notify_one();
        self.open.notified().await;
    }
}

/// In-memory store whose n-th `save` call fails once, with optional pause points
#[derive(Clone, Default)]
pub struct FailingStore {
    pub inner: InMemoryStore,
    saves: Arc<AtomicUsize>,
    fail_at: Arc<AtomicUsize>,
    after_suspend: Option<Gate>,
    before_take_ticket: Option<Gate>,
}

impl FailingStore {
    pub fn failing_at(n: usize) -> Self {
        let store = Self::default();
        store.fail_at.store(n, Ordering::SeqCst);
        store
    }

    /// Pause once a suspended checkpoint and its ticket are stored
    pub fn pausing_after_suspend(gate: Gate) -> Self {
        Self {
            after_suspend: Some(gate),
            ..Self::default()
        }
    }

    /// Pause before the first ticket removal
    pub fn pausing_before_take_ticket(gate: Gate) -> Self {
        Self {
            before_take_ticket: Some(gate),
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), CheckpointError> {
        self.inner.create_instance(instance).await
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstance>, CheckpointError> {
        self.inner.get_instance(instance_id).await
    }

    async fn list_instances(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        self.inner.list_instances(namespace, status).await
    }

    async fn save(
        &self,
        checkpoint: &Checkpoint,
        status: InstanceStatus,
    ) -> Result<String, CheckpointError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            return Err(CheckpointError::Storage(format!("injected failure on save {}", n)));
        }
        self.inner.save(checkpoint, status).await
    }

    async fn save_suspended(
        &self,
        checkpoint: &Checkpoint,
        ticket: &SuspensionTicket,
    ) -> Result<String, CheckpointError> {
        let id = self.inner.save_suspended(checkpoint, ticket).await?;
        if let Some(gate) = &self.after_suspend {
            gate.pass().await;
        }
        Ok(id)
    }

    async fn save_resumed(&self, checkpoint: &Checkpoint) -> Result<bool, CheckpointError> {
        self.inner.save_resumed(checkpoint).await
    }

    async fn load_latest(&self, instance_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.load_latest(instance_id).await
    }

    async fn list_chain(&self, instance_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.inner.list_chain(instance_id).await
    }

    async fn get_ticket(
        &self,
        instance_id: &str,
    ) -> Result<Option<SuspensionTicket>, CheckpointError> {
        self.inner.get_ticket(instance_id).await
    }

    async fn take_ticket(&self, instance_id: &str) -> Result<bool, CheckpointError> {
        if let Some(gate) = &self.before_take_ticket {
            gate.pass().await;
        }
        self.inner.take_ticket(instance_id).await
    }

    async fn prune(&self, instance_id: &str, keep_latest: usize) -> Result<usize, CheckpointError> {
        self.inner.prune(instance_id, keep_latest).await
    }
}

#[async_trait]
impl EffectStore for FailingStore {
    async fn get_effect(
        &self,
        instance_id: &str,
        call_site_id: &str,
        input_hash: &str,
    ) -> Result<Option<EffectRecord>, CheckpointError> {
        self.inner.get_effect(instance_id, call_site_id, input_hash).await
    }

    async fn put_effect(&self, record: &EffectRecord) -> Result<bool, CheckpointError> {
        self.inner.put_effect(record).await
    }

    async fn list_effects(&self, instance_id: &str) -> Result<Vec<EffectRecord>, CheckpointError> {
        self.inner.list_effects(instance_id).await
    }
}

/// Call counters for the side effects of [`counted_graph`]
#[derive(Clone, Default)]
pub struct Calls {
    pub fetch: Arc<AtomicUsize>,
    pub notify: Arc<AtomicUsize>,
}

impl Calls {
    pub fn fetch(&self) -> usize {
        self.fetch.load(Ordering::SeqCst)
    }

    pub fn notify(&self) -> usize {
        self.notify.load(Ordering::SeqCst)
    }
}

/// fetch (effect) -> compute (pure) -> notify (effect) -> END
pub fn counted_graph(calls: &Calls) -> StateGraph {
    let mut graph = StateGraph::new("counted");

    let fetch_calls = calls.fetch.clone();
    graph.add_step("fetch", move |state, ctx| {
        let calls = fetch_calls.clone();
        async move {
            let task_id: String = state.require_as("task_id")?;
            let value: u64 = ctx
                .effect("fetch", &task_id, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(21)
                })
                .await?;
            Ok(StateRecord::new().with("fetched", value))
        }
    });

    graph.add_step("compute", |state, _ctx| async move {
        let fetched: u64 = state.require_as("fetched")?;
        Ok(StateRecord::new().with("total", fetched * 2))
    });

    let notify_calls = calls.notify.clone();
    graph.add_step("notify", move |state, ctx| {
        let calls = notify_calls.clone();
        async move {
            let total: u64 = state.require_as("total")?;
            let receipt: String = ctx
                .effect("notify", &json!({"total": total}), move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(format!("receipt-{}", n))
                })
                .await?;
            Ok(StateRecord::new().with("receipt", receipt))
        }
    });

    graph
        .set_entry("fetch")
        .add_edge("fetch", "compute")
        .add_edge("compute", "notify")
        .add_finish("notify");
    graph
}

/// One step that asks for approval between `opt-1` and `opt-2`, then finishes
pub fn approval_graph(name: &str) -> StateGraph {
    let mut graph = StateGraph::new(name);
    graph.add_step("approve", |_state, ctx| async move {
        match ctx.decision() {
            Some(choices) => Ok(StateRecord::new().with("approved", json!(choices))),
            None => ctx.suspend(SuspendRequest::new(
                json!({"question": "Which option?"}),
                ["opt-1", "opt-2"],
            )),
        }
    });
    graph.set_entry("approve").add_edge("approve", END);
    graph
}
