//! Run configuration and outcomes

use rescuegraph_checkpoint::{InstanceStatus, SuspensionTicket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::durability::Durability;
use crate::state::StateRecord;

/// Namespace used when a run does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Cooperative cancellation signal checked before every step
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation execution settings
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub durability: Durability,
    /// Ticket lifetime for suspensions whose request sets none
    pub suspension_ttl: Option<Duration>,
    /// Checkpoints kept per instance after completion; `None` keeps all
    pub checkpoint_retention: Option<usize>,
    pub cancel: CancellationFlag,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_suspension_ttl(mut self, ttl: Duration) -> Self {
        self.suspension_ttl = Some(ttl);
        self
    }

    pub fn with_checkpoint_retention(mut self, keep_latest: usize) -> Self {
        self.checkpoint_retention = Some(keep_latest);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Identity and options for a new instance
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Generated (UUID v4) when unset
    pub instance_id: Option<String>,
    pub namespace: String,
    pub options: ExecutionOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            options: ExecutionOptions::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.options.durability = durability;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Where an invocation left the instance
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub instance_id: String,
    pub status: InstanceStatus,
    /// State at the last step boundary
    pub state: StateRecord,
    /// The pending ticket when `status` is suspended
    pub suspension: Option<SuspensionTicket>,
    /// Captured error when `status` is failed
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    pub fn is_suspended(&self) -> bool {
        self.status == InstanceStatus::Suspended
    }

    pub fn is_failed(&self) -> bool {
        self.status == InstanceStatus::Failed
    }
}
