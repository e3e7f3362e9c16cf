//! StateGraph builder API for constructing durable workflows
//!
//! [`StateGraph`] collects steps and edges through a fluent `&mut Self` interface and
//! turns them into an executable [`CompiledGraph`] with [`compile`](StateGraph::compile).
//! Structural mistakes are collected while building and reported together by
//! `compile()`, so building never panics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  StateGraph (Builder)                                   │
//! │                                                         │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐             │
//! │  │  intake  │──→│ allocate │──→│ approve  │──→ END      │
//! │  └──────────┘   └──────────┘   └──────────┘             │
//! │        ↓              ↓              ↓                  │
//! │  ┌───────────────────────────────────────┐              │
//! │  │  StateRecord (shallow merge per step) │              │
//! │  └───────────────────────────────────────┘              │
//! └─────────────────────────────────────────────────────────┘
//!                       │ compile()
//!                       ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  CompiledGraph (Executable)                             │
//! │                                                         │
//! │  • one step at a time, checkpoint between steps         │
//! │  • suspend / resume on human decisions                  │
//! │  • recover from the last durable checkpoint             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rescuegraph_core::{RunConfig, StateGraph, StateRecord, END};
//!
//! # async fn example() -> rescuegraph_core::Result<()> {
//! let mut graph = StateGraph::new("triage");
//!
//! graph.add_step("classify", |state, _ctx| async move {
//!     let severity: u32 = state.get_as("severity")?.unwrap_or(0);
//!     Ok(StateRecord::new().with("urgent", severity >= 3))
//! });
//! graph.add_step("escalate", |_state, _ctx| async move {
//!     Ok(StateRecord::new().with("escalated", true))
//! });
//!
//! graph.set_entry("classify");
//! graph.add_conditional_edge(
//!     "classify",
//!     |state| if state.get("urgent") == Some(&true.into()) { "urgent".into() } else { "routine".into() },
//!     [("urgent", "escalate"), ("routine", END)],
//! );
//! graph.add_finish("escalate");
//!
//! let compiled = graph.compile()?;
//! let initial = StateRecord::new()
//!     .with("task_id", "t-1")
//!     .with("caller_id", "c-1")
//!     .with("thread_id", "th-1")
//!     .with("severity", 4);
//! let outcome = compiled.run(initial, RunConfig::default()).await?;
//! assert_eq!(outcome.state.get("escalated"), Some(&true.into()));
//! # Ok(())
//! # }
//! ```
//!
//! # Loops
//!
//! Edges may form cycles only through a conditional edge. The graph cannot see
//! whether a loop terminates, so the decision function must bound it, typically with a
//! counter kept in state:
//!
//! ```rust,ignore
//! graph.add_conditional_edge(
//!     "handle_error",
//!     |state| {
//!         let attempts: u32 = state.get_as("error_count").ok().flatten().unwrap_or(0);
//!         if attempts < 3 { "retry".into() } else { "give_up".into() }
//!     },
//!     [("retry", "dispatch"), ("give_up", "report")],
//! );
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::compiled::CompiledGraph;
use crate::context::StepContext;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, RouterFn, StepFn, StepSpec, END};
use crate::state::StateRecord;

/// Fluent builder for workflow graphs
pub struct StateGraph {
    name: String,
    graph: Graph,
    problems: Vec<String>,
}

impl StateGraph {
    /// Start an empty graph; `name` is what the engine registers it under
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: Graph::new(),
            problems: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a step
    ///
    /// The executor receives the full current state and the step's context, and
    /// returns the partial state to merge.
    pub fn add_step<F, Fut>(&mut self, name: impl Into<String>, executor: F) -> &mut Self
    where
        F: Fn(StateRecord, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StateRecord>> + Send + 'static,
    {
        let executor: StepFn = Arc::new(move |state, ctx| Box::pin(executor(state, ctx)));
        self.add_step_fn(name, executor)
    }

    /// Add a step from an already boxed executor
    pub fn add_step_fn(&mut self, name: impl Into<String>, executor: StepFn) -> &mut Self {
        let name = name.into();
        if name == END || name.starts_with("__") {
            self.problems
                .push(format!("step name '{}' is reserved", name));
        } else if self.graph.steps.contains_key(&name) {
            self.problems.push(format!("duplicate step '{}'", name));
        } else {
            self.graph
                .steps
                .insert(name.clone(), StepSpec { name, executor });
        }
        self
    }

    /// Unconditional edge; `to` may be [`END`]
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Conditional edge
    ///
    /// `router` maps the updated state to a label; `branches` maps each label to a
    /// target step or [`END`]. A label missing from the table fails the instance at
    /// run time.
    pub fn add_conditional_edge<F, I, L, T>(
        &mut self,
        from: impl Into<String>,
        router: F,
        branches: I,
    ) -> &mut Self
    where
        F: Fn(&StateRecord) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (L, T)>,
        L: Into<String>,
        T: Into<String>,
    {
        let router: RouterFn = Arc::new(router);
        let branches: HashMap<String, String> = branches
            .into_iter()
            .map(|(label, to)| (label.into(), to.into()))
            .collect();
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Conditional { router, branches });
        self
    }

    pub fn set_entry(&mut self, step: impl Into<String>) -> &mut Self {
        self.graph.entry = Some(step.into());
        self
    }

    /// Shorthand for `add_edge(step, END)`
    pub fn add_finish(&mut self, step: impl Into<String>) -> &mut Self {
        self.add_edge(step, END)
    }

    /// Validate and produce an executable graph backed by an in-memory store
    ///
    /// Use [`CompiledGraph::with_store`] to attach a durable backend.
    pub fn compile(self) -> Result<CompiledGraph> {
        let mut problems = self.problems;
        if let Err(problem) = self.graph.validate() {
            problems.push(problem);
        }
        if !problems.is_empty() {
            return Err(GraphError::Engine(format!(
                "invalid graph '{}': {}",
                self.name,
                problems.join("; ")
            )));
        }
        Ok(CompiledGraph::new(self.name, self.graph))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
