//! Durability modes and the checkpoint writer that enforces them
//!
//! | Mode | Intermediate checkpoints | Crash window |
//! |------|--------------------------|--------------|
//! | `sync` | written before the next step starts | none |
//! | `async` | queued to a background writer, in order | steps since the last flushed write |
//! | `exit` | skipped | the whole run since the last suspension |
//!
//! Terminal (completed, failed) and suspended checkpoints are written synchronously in
//! every mode, after any queued writes have been flushed.

use rescuegraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointPayload, CheckpointStore, InstanceStatus,
    SuspensionTicket,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};

pub use rescuegraph_checkpoint::Durability;

type Queued = (Checkpoint, InstanceStatus);

struct Background {
    tx: mpsc::UnboundedSender<Queued>,
    handle: JoinHandle<std::result::Result<(), CheckpointError>>,
}

/// Appends one instance's checkpoints according to a [`Durability`] mode
///
/// Tracks the id of the newest checkpoint it produced so every write links to its
/// parent. The writer is owned by a single execution loop.
pub(crate) struct CheckpointWriter {
    store: Arc<dyn CheckpointStore>,
    mode: Durability,
    instance_id: String,
    namespace: String,
    last_id: Option<String>,
    background: Option<Background>,
}

impl CheckpointWriter {
    pub(crate) fn new(
        store: Arc<dyn CheckpointStore>,
        mode: Durability,
        instance_id: impl Into<String>,
        namespace: impl Into<String>,
        last_id: Option<String>,
    ) -> Self {
        Self {
            store,
            mode,
            instance_id: instance_id.into(),
            namespace: namespace.into(),
            last_id,
            background: None,
        }
    }

    pub(crate) fn mode(&self) -> Durability {
        self.mode
    }

    fn next(&self, payload: CheckpointPayload) -> Checkpoint {
        Checkpoint::new(
            self.instance_id.clone(),
            self.namespace.clone(),
            self.last_id.clone(),
            payload,
        )
    }

    /// Record a `running` checkpoint between steps
    pub(crate) async fn intermediate(&mut self, payload: CheckpointPayload) -> Result<()> {
        match self.mode {
            Durability::Exit => Ok(()),
            Durability::Sync => {
                let checkpoint = self.next(payload);
                let id = self.store.save(&checkpoint, InstanceStatus::Running).await?;
                self.last_id = Some(id);
                Ok(())
            }
            Durability::Async => {
                let checkpoint = self.next(payload);
                self.last_id = Some(checkpoint.checkpoint_id.clone());
                let background = self.background.get_or_insert_with(|| {
                    spawn_background(self.store.clone(), self.instance_id.clone())
                });
                background
                    .tx
                    .send((checkpoint, InstanceStatus::Running))
                    .map_err(|_| GraphError::Engine("checkpoint writer stopped".to_string()))
            }
        }
    }

    /// Wait for queued writes; the first failed write is returned
    pub(crate) async fn flush(&mut self) -> Result<()> {
        let Some(Background { tx, handle }) = self.background.take() else {
            return Ok(());
        };
        drop(tx);
        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GraphError::Persistence(e)),
            Err(join) => Err(GraphError::Engine(format!(
                "checkpoint writer task failed: {}",
                join
            ))),
        }
    }

    /// Flush, then write a terminal checkpoint synchronously
    pub(crate) async fn finish(
        &mut self,
        payload: CheckpointPayload,
        status: InstanceStatus,
    ) -> Result<String> {
        self.flush().await?;
        let checkpoint = self.next(payload);
        let id = self.store.save(&checkpoint, status).await?;
        self.last_id = Some(id.clone());
        Ok(id)
    }

    /// Flush, then write the suspended checkpoint and its ticket together
    pub(crate) async fn suspend(
        &mut self,
        payload: CheckpointPayload,
        ticket: &SuspensionTicket,
    ) -> Result<String> {
        self.flush().await?;
        let checkpoint = self.next(payload);
        let id = self.store.save_suspended(&checkpoint, ticket).await?;
        self.last_id = Some(id.clone());
        Ok(id)
    }
}

fn spawn_background(store: Arc<dyn CheckpointStore>, instance_id: String) -> Background {
    let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
    let handle = tokio::spawn(async move {
        let mut failure = None;
        while let Some((checkpoint, status)) = rx.recv().await {
            // Later checkpoints chain onto the failed one and would only conflict
            if failure.is_some() {
                continue;
            }
            match store.save(&checkpoint, status).await {
                Ok(_) => debug!(
                    instance_id = %instance_id,
                    checkpoint_id = %checkpoint.checkpoint_id,
                    "Background checkpoint written"
                ),
                Err(e) => {
                    warn!(instance_id = %instance_id, error = %e, "Background checkpoint failed");
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });
    Background { tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescuegraph_checkpoint::{InMemoryStore, StepCursor, WorkflowInstance};
    use serde_json::json;

    fn payload(step: &str, index: u64) -> CheckpointPayload {
        CheckpointPayload {
            state: json!({"n": index}),
            cursor: StepCursor::at(step, index),
            status: InstanceStatus::Running,
            error: None,
            decision: None,
        }
    }

    fn done(index: u64) -> CheckpointPayload {
        CheckpointPayload {
            state: json!({"n": index}),
            cursor: StepCursor::finished(index),
            status: InstanceStatus::Completed,
            error: None,
            decision: None,
        }
    }

    async fn setup() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_instance(&WorkflowInstance::new("i1", "default", "g"))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("sync".parse::<Durability>().unwrap(), Durability::Sync);
        assert_eq!(" ASYNC ".parse::<Durability>().unwrap(), Durability::Async);
        assert_eq!("exit".parse::<Durability>().unwrap(), Durability::Exit);
        assert!("eventually".parse::<Durability>().is_err());
        assert_eq!(Durability::default(), Durability::Sync);
        assert_eq!(Durability::Async.to_string(), "async");
    }

    #[tokio::test]
    async fn test_sync_writes_every_checkpoint() {
        let store = setup().await;
        let mut writer =
            CheckpointWriter::new(Arc::new(store.clone()), Durability::Sync, "i1", "default", None);

        writer.intermediate(payload("a", 0)).await.unwrap();
        assert_eq!(store.checkpoint_count().await, 1);
        writer.intermediate(payload("b", 1)).await.unwrap();
        assert_eq!(store.checkpoint_count().await, 2);

        writer.finish(done(2), InstanceStatus::Completed).await.unwrap();
        assert_eq!(store.list_chain("i1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_async_chain_is_complete_after_finish() {
        let store = setup().await;
        let mut writer =
            CheckpointWriter::new(Arc::new(store.clone()), Durability::Async, "i1", "default", None);

        for i in 0..5 {
            writer.intermediate(payload("step", i)).await.unwrap();
        }
        writer.finish(done(5), InstanceStatus::Completed).await.unwrap();

        let chain = store.list_chain("i1").await.unwrap();
        assert_eq!(chain.len(), 6);
        let indices: Vec<u64> = chain.iter().map(|c| c.payload.cursor.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_exit_writes_only_terminal() {
        let store = setup().await;
        let mut writer =
            CheckpointWriter::new(Arc::new(store.clone()), Durability::Exit, "i1", "default", None);

        writer.intermediate(payload("a", 0)).await.unwrap();
        writer.intermediate(payload("b", 1)).await.unwrap();
        assert_eq!(store.checkpoint_count().await, 0);

        writer.finish(done(2), InstanceStatus::Completed).await.unwrap();
        assert_eq!(store.checkpoint_count().await, 1);
        let instance = store.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn test_async_failure_surfaces_on_flush() {
        // No instance row: every save fails with NotFound
        let store = InMemoryStore::new();
        let mut writer =
            CheckpointWriter::new(Arc::new(store.clone()), Durability::Async, "ghost", "default", None);

        writer.intermediate(payload("a", 0)).await.unwrap();
        writer.intermediate(payload("b", 1)).await.unwrap();

        let err = writer.flush().await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(writer.mode(), Durability::Async);
    }
}
