//! # rescuegraph-checkpoint - Durable state for workflow instances
//!
//! Persistence layer for the rescuegraph engine. It stores four kinds of record:
//!
//! - [`WorkflowInstance`] - one row per execution, carrying its current status
//! - [`Checkpoint`] - immutable snapshots of state and step cursor, chained by parent id
//! - [`EffectRecord`] - results of wrapped external calls, keyed by call identity
//! - [`SuspensionTicket`] - a pending human decision for a suspended instance
//!
//! ## Stores
//!
//! The engine talks to storage only through the [`CheckpointStore`] and
//! [`EffectStore`] traits. [`InMemoryStore`] suits tests and short-lived processes;
//! [`SqliteStore`] persists across restarts and is safe to share between processes
//! on the same database file.
//!
//! ```rust,no_run
//! use rescuegraph_checkpoint::{
//!     Checkpoint, CheckpointPayload, CheckpointStore, InstanceStatus, SqliteStore,
//!     StepCursor, WorkflowInstance,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> rescuegraph_checkpoint::Result<()> {
//! let store = SqliteStore::open("rescuegraph.db").await?;
//! store.create_instance(&WorkflowInstance::new("inc-1", "default", "rescue_dispatch")).await?;
//!
//! let checkpoint = Checkpoint::new(
//!     "inc-1",
//!     "default",
//!     None,
//!     CheckpointPayload {
//!         state: json!({"task_id": "inc-1"}),
//!         cursor: StepCursor::at("allocate", 1),
//!         status: InstanceStatus::Running,
//!         error: None,
//!         decision: None,
//!     },
//! );
//! store.save(&checkpoint, InstanceStatus::Running).await?;
//! assert!(store.load_latest("inc-1").await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{
    now_millis, Checkpoint, CheckpointPayload, Decision, Durability, EffectRecord, InstanceStatus,
    StepCursor, SuspensionTicket, WorkflowInstance,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, EffectStore};
