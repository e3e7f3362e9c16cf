//! In-memory store for development and testing
//!
//! [`InMemoryStore`] implements both [`CheckpointStore`] and [`EffectStore`] on top of
//! a single `Arc<RwLock<..>>`. Every operation takes the lock once, which gives the
//! same atomicity the SQLite store gets from transactions. Data is lost when the
//! process exits.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  InMemoryStore                               │
//! │   instances:   instance_id → WorkflowInstance│
//! │   checkpoints: instance_id → Vec<Checkpoint> │
//! │   tickets:     instance_id → SuspensionTicket│
//! │   effects:     (id, call_site, hash) → record│
//! └──────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::checkpoint::{
    Checkpoint, EffectRecord, InstanceStatus, SuspensionTicket, WorkflowInstance,
};
use crate::error::{CheckpointError, Result};
use crate::traits::{chain_from_latest, CheckpointStore, EffectStore};

type EffectKey = (String, String, String);

#[derive(Default)]
struct Inner {
    instances: HashMap<String, WorkflowInstance>,
    checkpoints: HashMap<String, Vec<Checkpoint>>,
    tickets: HashMap<String, SuspensionTicket>,
    effects: HashMap<EffectKey, EffectRecord>,
    effect_order: HashMap<String, Vec<EffectKey>>,
}

impl Inner {
    fn append(&mut self, checkpoint: &Checkpoint, status: InstanceStatus) -> Result<String> {
        let instance = self
            .instances
            .get_mut(&checkpoint.instance_id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint.instance_id.clone()))?;

        let chain = self
            .checkpoints
            .entry(checkpoint.instance_id.clone())
            .or_default();
        let latest = chain.last().map(|cp| cp.checkpoint_id.clone());
        if latest != checkpoint.parent_checkpoint_id {
            return Err(CheckpointError::Conflict {
                instance_id: checkpoint.instance_id.clone(),
                expected: latest,
                actual: checkpoint.parent_checkpoint_id.clone(),
            });
        }

        chain.push(checkpoint.clone());
        instance.status = status;
        instance.updated_at = Utc::now();
        Ok(checkpoint.checkpoint_id.clone())
    }
}

/// Thread-safe in-memory implementation of both store traits
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored checkpoints across all instances
    pub async fn checkpoint_count(&self) -> usize {
        self.inner
            .read()
            .await
            .checkpoints
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.instances.contains_key(&instance.instance_id) {
            return Err(CheckpointError::AlreadyExists(instance.instance_id.clone()));
        }
        inner
            .instances
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self.inner.read().await.instances.get(instance_id).cloned())
    }

    async fn list_instances(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>> {
        let inner = self.inner.read().await;
        let mut instances: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| namespace.map_or(true, |ns| i.namespace == ns))
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        instances.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(instances)
    }

    async fn save(&self, checkpoint: &Checkpoint, status: InstanceStatus) -> Result<String> {
        self.inner.write().await.append(checkpoint, status)
    }

    async fn save_suspended(
        &self,
        checkpoint: &Checkpoint,
        ticket: &SuspensionTicket,
    ) -> Result<String> {
        let mut inner = self.inner.write().await;
        let id = inner.append(checkpoint, InstanceStatus::Suspended)?;
        inner
            .tickets
            .insert(ticket.instance_id.clone(), ticket.clone());
        Ok(id)
    }

    async fn save_resumed(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.tickets.contains_key(&checkpoint.instance_id) {
            return Ok(false);
        }
        inner.append(checkpoint, InstanceStatus::Running)?;
        inner.tickets.remove(&checkpoint.instance_id);
        Ok(true)
    }

    async fn load_latest(&self, instance_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .inner
            .read()
            .await
            .checkpoints
            .get(instance_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn list_chain(&self, instance_id: &str) -> Result<Vec<Checkpoint>> {
        let checkpoints = self
            .inner
            .read()
            .await
            .checkpoints
            .get(instance_id)
            .cloned()
            .unwrap_or_default();
        Ok(chain_from_latest(checkpoints))
    }

    async fn get_ticket(&self, instance_id: &str) -> Result<Option<SuspensionTicket>> {
        Ok(self.inner.read().await.tickets.get(instance_id).cloned())
    }

    async fn take_ticket(&self, instance_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .tickets
            .remove(instance_id)
            .is_some())
    }

    async fn prune(&self, instance_id: &str, keep_latest: usize) -> Result<usize> {
        let keep = keep_latest.max(1);
        let mut inner = self.inner.write().await;
        let Some(chain) = inner.checkpoints.get_mut(instance_id) else {
            return Ok(0);
        };
        let removed = chain.len().saturating_sub(keep);
        chain.drain(..removed);
        Ok(removed)
    }
}

#[async_trait]
impl EffectStore for InMemoryStore {
    async fn get_effect(
        &self,
        instance_id: &str,
        call_site_id: &str,
        input_hash: &str,
    ) -> Result<Option<EffectRecord>> {
        let key = (
            instance_id.to_string(),
            call_site_id.to_string(),
            input_hash.to_string(),
        );
        Ok(self.inner.read().await.effects.get(&key).cloned())
    }

    async fn put_effect(&self, record: &EffectRecord) -> Result<bool> {
        let key = (
            record.instance_id.clone(),
            record.call_site_id.clone(),
            record.input_hash.clone(),
        );
        let mut inner = self.inner.write().await;
        if inner.effects.contains_key(&key) {
            return Ok(false);
        }
        inner.effects.insert(key.clone(), record.clone());
        inner
            .effect_order
            .entry(record.instance_id.clone())
            .or_default()
            .push(key);
        Ok(true)
    }

    async fn list_effects(&self, instance_id: &str) -> Result<Vec<EffectRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .effect_order
            .get(instance_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| inner.effects.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}
