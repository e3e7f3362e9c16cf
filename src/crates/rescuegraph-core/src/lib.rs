//! # rescuegraph-core - Durable Workflow Graphs
//!
//! Build long-running response workflows as graphs of async steps that survive
//! process restarts, never repeat a completed external call, and can stop to wait for
//! a human decision.
//!
//! ## Overview
//!
//! - **Graph execution** - steps joined by direct and conditional edges, run one at a
//!   time over a shared [`StateRecord`]
//! - **Checkpointing** - a checkpoint per step boundary, with [`Durability`] modes
//!   trading latency for crash window
//! - **Idempotent effects** - [`EffectScope::call`] records external call results and
//!   replays them on re-execution
//! - **Human-in-the-loop** - [`StepContext::suspend`] parks an instance with a ticket;
//!   [`WorkflowEngine::resume_workflow`] validates the decision and continues
//! - **Recovery** - [`WorkflowEngine::recover`] re-enters an orphaned instance at its
//!   last durable cursor
//!
//! ## Core Concepts
//!
//! ### State
//!
//! Each step receives the full [`StateRecord`] and returns a partial one, merged key by
//! key (last writer wins). `task_id`, `caller_id` and `thread_id` are required at start.
//!
//! ### Checkpoints
//!
//! ```text
//!   run ─► [cp0: cursor=intake] ─► intake ─► [cp1: cursor=allocate] ─► allocate ─► ...
//!                                                                         │
//!                                            crash here: recover() ◄──────┘
//!                                            re-runs allocate from cp1
//! ```
//!
//! A checkpoint is written before the next step starts (in `sync` mode), so a crash
//! loses at most the step in progress. Effects that step already completed are
//! replayed from their records instead of being called again.
//!
//! ### Suspension
//!
//! ```text
//!   approve ── ctx.suspend(["unit-a", "unit-b"]) ──► status = suspended, ticket stored
//!   resume(["unit-b"]) ──► ticket consumed ──► approve re-entered, ctx.decision() = ["unit-b"]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rescuegraph_core::{
//!     EngineConfig, StartOptions, StateGraph, StateRecord, SuspendRequest, WorkflowEngine,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> rescuegraph_core::Result<()> {
//! let mut graph = StateGraph::new("approval");
//! graph.add_step("approve", |_state, ctx| async move {
//!     match ctx.decision() {
//!         Some(choices) => Ok(StateRecord::new().with("approved", json!(choices))),
//!         None => ctx.suspend(SuspendRequest::new(json!({"question": "Send?"}), ["yes", "no"])),
//!     }
//! });
//! graph.set_entry("approve").add_finish("approve");
//!
//! let engine = WorkflowEngine::new(EngineConfig::default());
//! engine.register(graph.compile()?);
//!
//! let initial = StateRecord::new()
//!     .with("task_id", "t-1")
//!     .with("caller_id", "dispatcher-3")
//!     .with("thread_id", "th-9");
//! let started = engine.start_workflow("approval", initial, StartOptions::new()).await?;
//! assert!(started.is_suspended());
//!
//! let done = engine
//!     .resume_workflow(started.instance_id.as_str(), &["yes".to_string()])
//!     .await?;
//! assert_eq!(done.state.get("approved"), Some(&json!(["yes"])));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`builder`] - [`StateGraph`] builder
//! - [`graph`] - graph structure and validation
//! - [`compiled`] - [`CompiledGraph`] and the execution loop
//! - [`durability`] - durability modes
//! - [`effect`] - idempotent effect wrapper
//! - [`suspend`] - suspension requests and decision validation
//! - [`engine`] - [`WorkflowEngine`] invocation boundary
//! - [`config`] - [`EngineConfig`]

pub mod builder;
pub mod compiled;
pub mod config;
pub mod context;
pub mod durability;
pub mod effect;
pub mod engine;
pub mod error;
pub mod graph;
pub mod state;
pub mod suspend;

pub use builder::StateGraph;
pub use compiled::{
    CancellationFlag, CompiledGraph, ExecutionOptions, RunConfig, RunOutcome, CANCELLED_ERROR,
    DEFAULT_NAMESPACE, EXPIRED_ERROR,
};
pub use config::{EngineConfig, ENV_PREFIX};
pub use context::StepContext;
pub use durability::Durability;
pub use effect::{input_hash, EffectScope};
pub use engine::{CancelOutcome, InstanceRef, InstanceView, StartOptions, WorkflowEngine};
pub use error::{EffectError, GraphError, Result, ValidationError};
pub use graph::{Edge, Graph, RouterFn, StepFn, StepFuture, StepSpec, END};
pub use state::{StateRecord, REQUIRED_KEYS};
pub use suspend::{validate_decision, SuspendRequest, DEFAULT_DECISION_KEY};

pub use rescuegraph_checkpoint::{
    Checkpoint, CheckpointStore, EffectRecord, EffectStore, InMemoryStore, InstanceStatus,
    SqliteStore, StepCursor, SuspensionTicket, WorkflowInstance,
};
