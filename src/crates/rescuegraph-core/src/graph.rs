//! Graph structure: steps, edges and structural validation
//!
//! Built through [`StateGraph`](crate::StateGraph); most code never touches [`Graph`]
//! directly.
//!
//! ```text
//!   entry ──► intake ──► allocate ──► approve ──┬─ "dispatch" ─► dispatch ──► END
//!                                               └─ "reject" ───► END
//! ```
//!
//! Every step has exactly one outgoing edge set: either one [`Edge::Direct`] edge or one
//! [`Edge::Conditional`] edge whose decision function picks a label from its branch
//! table.

use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::context::StepContext;
use crate::error::Result;
use crate::state::StateRecord;

/// Terminal pseudo-step
pub const END: &str = "__end__";

pub type StepFuture = BoxFuture<'static, Result<StateRecord>>;

/// A step: full state in, partial state out
pub type StepFn = Arc<dyn Fn(StateRecord, StepContext) -> StepFuture + Send + Sync>;

/// Decision function for conditional edges: state in, branch label out
pub type RouterFn = Arc<dyn Fn(&StateRecord) -> String + Send + Sync>;

/// Outgoing edge of a step
#[derive(Clone)]
pub enum Edge {
    /// Always continue to this step (or [`END`])
    Direct(String),

    /// Evaluate `router` against the updated state and follow the matching branch
    Conditional {
        router: RouterFn,
        /// label → target step (or [`END`])
        branches: HashMap<String, String>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

impl Edge {
    /// Every step this edge can lead to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(to) => vec![to.as_str()],
            Edge::Conditional { branches, .. } => branches.values().map(String::as_str).collect(),
        }
    }
}

/// A named step and its executor
#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    pub executor: StepFn,
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec").field("name", &self.name).finish()
    }
}

/// Steps, edges and entry point of a workflow
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub steps: HashMap<String, StepSpec>,
    pub edges: HashMap<String, Vec<Edge>>,
    pub entry: Option<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single outgoing edge of `step`, once validated
    pub fn edge(&self, step: &str) -> Option<&Edge> {
        self.edges.get(step).and_then(|edges| edges.first())
    }

    /// Structural checks run by `compile()`
    ///
    /// - an entry step is set and exists
    /// - edges start at known steps and end at known steps or [`END`]
    /// - each step has exactly one outgoing edge set, and branch tables are non-empty
    /// - no cycle consists solely of unconditional edges
    /// - [`END`] is reachable from the entry
    pub fn validate(&self) -> std::result::Result<(), String> {
        let entry = self.entry.as_ref().ok_or("missing entry step")?;
        if !self.steps.contains_key(entry) {
            return Err(format!("entry step '{}' does not exist", entry));
        }

        for (from, edges) in &self.edges {
            if !self.steps.contains_key(from) {
                return Err(format!("edge source '{}' does not exist", from));
            }
            for edge in edges {
                if let Edge::Conditional { branches, .. } = edge {
                    if branches.is_empty() {
                        return Err(format!("conditional edge from '{}' has no branches", from));
                    }
                }
                for to in edge.targets() {
                    if to != END && !self.steps.contains_key(to) {
                        return Err(format!("edge target '{}' (from '{}') does not exist", to, from));
                    }
                }
            }
        }

        let mut names: Vec<&String> = self.steps.keys().collect();
        names.sort();
        for name in &names {
            match self.edges.get(*name).map(Vec::len).unwrap_or(0) {
                0 => return Err(format!("step '{}' has no outgoing edge", name)),
                1 => {}
                n => return Err(format!("step '{}' has {} outgoing edge sets, expected 1", name, n)),
            }
        }

        for name in &names {
            if let Some(cycle) = self.unconditional_cycle_from(name) {
                return Err(format!(
                    "unconditional cycle can never terminate: {}",
                    cycle.join(" -> ")
                ));
            }
        }

        if !self.end_reachable_from(entry) {
            return Err(format!("END is not reachable from entry step '{}'", entry));
        }

        Ok(())
    }

    /// Follow direct edges from `start`; a revisit means a loop no state can exit
    fn unconditional_cycle_from(&self, start: &str) -> Option<Vec<String>> {
        let mut path = vec![start.to_string()];
        let mut seen = HashSet::from([start.to_string()]);
        let mut current = start.to_string();

        while let Some(Edge::Direct(next)) = self.edge(&current) {
            if next == END {
                return None;
            }
            path.push(next.clone());
            if !seen.insert(next.clone()) {
                return Some(path);
            }
            current = next.clone();
        }
        None
    }

    fn end_reachable_from(&self, entry: &str) -> bool {
        let mut queue = VecDeque::from([entry.to_string()]);
        let mut visited = HashSet::new();

        while let Some(step) = queue.pop_front() {
            if step == END {
                return true;
            }
            if !visited.insert(step.clone()) {
                continue;
            }
            for edge in self.edges.get(&step).into_iter().flatten() {
                queue.extend(edge.targets().into_iter().map(str::to_string));
            }
        }
        false
    }
}
