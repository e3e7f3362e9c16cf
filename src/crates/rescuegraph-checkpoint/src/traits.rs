//! Storage traits implemented by every backend
//!
//! The engine depends only on these traits (as `Arc<dyn CheckpointStore>` and
//! `Arc<dyn EffectStore>`), so a backend can be swapped without touching workflow
//! code. Two implementations ship with this crate:
//!
//! - [`InMemoryStore`](crate::InMemoryStore) for tests and single-process runs
//! - [`SqliteStore`](crate::SqliteStore) for durable, restartable deployments
//!
//! # Contract
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `save` / `save_suspended` | checkpoint insert and instance status update commit together |
//! | `save` | rejects a checkpoint whose parent is not the current latest (`Conflict`) |
//! | `take_ticket` / `save_resumed` | succeed for exactly one caller per ticket |
//! | `put_effect` | insert-or-ignore; the first stored result wins |
//! | `prune` | never deletes the latest checkpoint |

use async_trait::async_trait;

use crate::checkpoint::{
    Checkpoint, EffectRecord, InstanceStatus, SuspensionTicket, WorkflowInstance,
};
use crate::error::Result;

/// Persistence for instances, checkpoint chains and suspension tickets
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert a new instance row
    ///
    /// Fails with `AlreadyExists` if the id is taken.
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>>;

    /// Instances ordered by creation time, optionally filtered
    async fn list_instances(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>>;

    /// Append a checkpoint and set the instance status in one transaction
    ///
    /// Returns the stored checkpoint id.
    async fn save(&self, checkpoint: &Checkpoint, status: InstanceStatus) -> Result<String>;

    /// Append a `suspended` checkpoint and store its ticket in one transaction
    async fn save_suspended(
        &self,
        checkpoint: &Checkpoint,
        ticket: &SuspensionTicket,
    ) -> Result<String>;

    /// Consume the instance's ticket and append a `running` checkpoint, atomically
    ///
    /// Returns `false`, writing nothing, if the ticket was already gone.
    async fn save_resumed(&self, checkpoint: &Checkpoint) -> Result<bool>;

    async fn load_latest(&self, instance_id: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoints reachable from the latest by parent links, oldest first
    async fn list_chain(&self, instance_id: &str) -> Result<Vec<Checkpoint>>;

    async fn get_ticket(&self, instance_id: &str) -> Result<Option<SuspensionTicket>>;

    /// Atomically remove the ticket
    ///
    /// Returns `true` only for the caller that actually deleted it.
    async fn take_ticket(&self, instance_id: &str) -> Result<bool>;

    /// Delete all but the newest `keep_latest` checkpoints (at least one is kept)
    ///
    /// Returns the number of checkpoints removed.
    async fn prune(&self, instance_id: &str, keep_latest: usize) -> Result<usize>;
}

/// Persistence for results of wrapped external calls
#[async_trait]
pub trait EffectStore: Send + Sync {
    async fn get_effect(
        &self,
        instance_id: &str,
        call_site_id: &str,
        input_hash: &str,
    ) -> Result<Option<EffectRecord>>;

    /// Insert-or-ignore; returns `true` if this call stored the record
    async fn put_effect(&self, record: &EffectRecord) -> Result<bool>;

    /// All effect records of an instance, oldest first
    async fn list_effects(&self, instance_id: &str) -> Result<Vec<EffectRecord>>;
}

/// Walk parent links back from the newest checkpoint and return oldest first
///
/// `checkpoints` must be in insertion order. Stops at the first missing parent, which
/// is where pruning cut the chain.
pub(crate) fn chain_from_latest(checkpoints: Vec<Checkpoint>) -> Vec<Checkpoint> {
    let mut by_id: std::collections::HashMap<String, Checkpoint> = checkpoints
        .iter()
        .map(|cp| (cp.checkpoint_id.clone(), cp.clone()))
        .collect();

    let mut chain = Vec::new();
    let mut next = checkpoints.last().map(|cp| cp.checkpoint_id.clone());
    while let Some(id) = next {
        match by_id.remove(&id) {
            Some(cp) => {
                next = cp.parent_checkpoint_id.clone();
                chain.push(cp);
            }
            None => break,
        }
    }
    chain.reverse();
    chain
}
