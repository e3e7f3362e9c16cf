//! Rescue Dispatch - Prebuilt Workflow
//!
//! A complete incident-response workflow built on the core engine. It takes a task
//! and a pool of candidate units, ranks them, asks a human which units to send,
//! dispatches them through a device gateway, and writes a report.
//!
//! # Graph
//!
//! ```text
//!   intake ──► allocate ──┬─(no candidates)──────────────────────────────┐
//!                         │                                              │
//!                         └─► estimate_travel ──► approve ──► dispatch ──┼─(ok / give up)──► report ──► END
//!                                                    ▲           │  ▲    │
//!                                                 suspend        │  │    │
//!                                                 for a human    ▼  │    │
//!                                                   handle_dispatch_error
//! ```
//!
//! | Step | External calls (all recorded effects) | Writes |
//! |------|----------------------------------------|--------|
//! | `intake` | geocode (when only an address is given), knowledge query | `task_location`, `required_capabilities`, `context` |
//! | `allocate` | none | `assignments` |
//! | `estimate_travel` | one route per shortlisted unit | `assignments` (re-ranked) |
//! | `approve` | none; suspends until a decision arrives | `approved_units` |
//! | `dispatch` | one device command per approved unit | `dispatched`, `dispatch_status`, `error_count`, `last_error` |
//! | `handle_dispatch_error` | none; backs off | `dispatch_status` |
//! | `report` | optional language-model summary | `outcome`, `report` |
//!
//! The dispatch loop is bounded: after `max_dispatch_retries` failed retries, or on
//! a rejection no retry can fix, the workflow reports `dispatch_failed` instead of
//! looping forever.
//!
//! # Example
//!
//! ```rust,ignore
//! use rescuegraph_prebuilt::{initial_state, rescue_dispatch_graph, DispatchServices, DispatchSettings};
//!
//! let services = DispatchServices::new(Arc::new(mapping), Arc::new(gateway));
//! let graph = rescue_dispatch_graph(services, DispatchSettings::default()).compile()?;
//! engine.register(graph);
//!
//! let state = initial_state("inc-1", "caller-7", "thread-1", &task, &candidates)?;
//! let outcome = engine.start_workflow("rescue_dispatch", state, StartOptions::default()).await?;
//! // outcome.suspension carries the shortlist; resume with the chosen unit ids
//! engine.resume_workflow(outcome.instance_id.as_str(), &["heli-2".to_string()]).await?;
//! ```

use futures::future::join_all;
use llm::{complete_once, ChatMessage, CompletionRequest, EndpointRegistry};
use rescuegraph_core::{
    EffectError, GraphError, StateGraph, StateRecord, StepContext, SuspendRequest, END,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tooling::rate_limit::DependencyLimits;
use tracing::{info, warn};

use crate::allocation::{rank_candidates, refine_with_travel_times, Assignment, GeoPoint, ResourceCandidate};
use crate::collaborators::{
    DeviceGateway, DispatchAck, DispatchCommand, KnowledgeStore, MappingService, RouteEstimate,
};
use crate::error::{DeviceError, DispatchError, Result};
use crate::settings::DispatchSettings;

type StepResult = rescuegraph_core::Result<StateRecord>;

/// Name the graph is compiled and registered under
pub const GRAPH_NAME: &str = "rescue_dispatch";

pub const INTAKE: &str = "intake";
pub const ALLOCATE: &str = "allocate";
pub const ESTIMATE_TRAVEL: &str = "estimate_travel";
pub const APPROVE: &str = "approve";
pub const DISPATCH: &str = "dispatch";
pub const HANDLE_DISPATCH_ERROR: &str = "handle_dispatch_error";
pub const REPORT: &str = "report";

/// Dependency names used with [`DependencyLimits`]
pub const MAPPING_DEPENDENCY: &str = "mapping";
pub const DEVICE_DEPENDENCY: &str = "devices";
pub const KNOWLEDGE_DEPENDENCY: &str = "knowledge";
pub const LLM_DEPENDENCY: &str = "llm";

/// State keys read and written by the workflow
pub mod keys {
    pub const TASK: &str = "task";
    pub const CANDIDATES: &str = "candidates";
    pub const TASK_LOCATION: &str = "task_location";
    pub const REQUIRED_CAPABILITIES: &str = "required_capabilities";
    pub const CONTEXT: &str = "context";
    pub const ASSIGNMENTS: &str = "assignments";
    pub const APPROVED_UNITS: &str = "approved_units";
    pub const DISPATCHED: &str = "dispatched";
    pub const DISPATCH_STATUS: &str = "dispatch_status";
    pub const ERROR_COUNT: &str = "error_count";
    pub const LAST_ERROR: &str = "last_error";
    pub const OUTCOME: &str = "outcome";
    pub const REPORT: &str = "report";
}

/// What needs doing and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Geocoded at intake when `location` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Initial state for a dispatch instance
pub fn initial_state(
    task_id: &str,
    caller_id: &str,
    thread_id: &str,
    task: &TaskRequest,
    candidates: &[ResourceCandidate],
) -> Result<StateRecord> {
    let mut state = StateRecord::new()
        .with("task_id", task_id)
        .with("caller_id", caller_id)
        .with("thread_id", thread_id);
    state.set(keys::TASK, task)?;
    state.set(keys::CANDIDATES, candidates)?;
    Ok(state)
}

/// Collaborators injected into the workflow
#[derive(Clone)]
pub struct DispatchServices {
    pub mapping: Arc<dyn MappingService>,
    pub gateway: Arc<dyn DeviceGateway>,
    pub knowledge: Option<Arc<dyn KnowledgeStore>>,
    pub models: Option<EndpointRegistry>,
    pub limits: DependencyLimits,
}

impl std::fmt::Debug for DispatchServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchServices")
            .field("knowledge", &self.knowledge.is_some())
            .field("models", &self.models.as_ref().map(|m| m.scopes()))
            .field("limits", &self.limits)
            .finish()
    }
}

impl DispatchServices {
    pub fn new(mapping: Arc<dyn MappingService>, gateway: Arc<dyn DeviceGateway>) -> Self {
        Self {
            mapping,
            gateway,
            knowledge: None,
            models: None,
            limits: DependencyLimits::default(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_models(mut self, models: EndpointRegistry) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_limits(mut self, limits: DependencyLimits) -> Self {
        self.limits = limits;
        self
    }
}

struct Shared {
    services: DispatchServices,
    settings: DispatchSettings,
}

impl Shared {
    /// Run a collaborator call under its dependency limit
    async fn limited<T, F>(&self, dependency: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.services.limits.run(dependency, fut).await?
    }
}

/// Build the rescue-dispatch graph
pub fn rescue_dispatch_graph(services: DispatchServices, settings: DispatchSettings) -> StateGraph {
    let shared = Arc::new(Shared { services, settings });
    let mut graph = StateGraph::new(GRAPH_NAME);

    let s = shared.clone();
    graph.add_step(INTAKE, move |state, ctx| intake(s.clone(), state, ctx));
    graph.add_step(ALLOCATE, |state, _ctx| async move { allocate(state) });
    let s = shared.clone();
    graph.add_step(ESTIMATE_TRAVEL, move |state, ctx| estimate_travel(s.clone(), state, ctx));
    let s = shared.clone();
    graph.add_step(APPROVE, move |state, ctx| approve(s.clone(), state, ctx));
    let s = shared.clone();
    graph.add_step(DISPATCH, move |state, ctx| dispatch(s.clone(), state, ctx));
    let s = shared.clone();
    graph.add_step(HANDLE_DISPATCH_ERROR, move |state, _ctx| {
        handle_dispatch_error(s.clone(), state)
    });
    let s = shared.clone();
    graph.add_step(REPORT, move |state, ctx| report(s.clone(), state, ctx));

    let max_retries = shared.settings.max_dispatch_retries;
    graph
        .set_entry(INTAKE)
        .add_edge(INTAKE, ALLOCATE)
        .add_conditional_edge(
            ALLOCATE,
            |state| {
                let empty = state
                    .get(keys::ASSIGNMENTS)
                    .and_then(Value::as_array)
                    .map_or(true, Vec::is_empty);
                let label = if empty { "none" } else { "ranked" };
                label.to_string()
            },
            [("none", REPORT), ("ranked", ESTIMATE_TRAVEL)],
        )
        .add_edge(ESTIMATE_TRAVEL, APPROVE)
        .add_edge(APPROVE, DISPATCH)
        .add_conditional_edge(
            DISPATCH,
            move |state| route_after_dispatch(state, max_retries),
            [
                ("done", REPORT),
                ("retry", HANDLE_DISPATCH_ERROR),
                ("give_up", REPORT),
            ],
        )
        .add_edge(HANDLE_DISPATCH_ERROR, DISPATCH)
        .add_edge(REPORT, END);
    graph
}

fn route_after_dispatch(state: &StateRecord, max_retries: u32) -> String {
    let status = state
        .get(keys::DISPATCH_STATUS)
        .and_then(Value::as_str)
        .unwrap_or_default();
    let errors = state
        .get(keys::ERROR_COUNT)
        .and_then(Value::as_u64)
        .unwrap_or_default();

    let label = match status {
        "ok" => "done",
        "failed" if errors <= u64::from(max_retries) => "retry",
        _ => "give_up",
    };
    label.to_string()
}

/// Resolve the task location and gather reference material
async fn intake(shared: Arc<Shared>, state: StateRecord, ctx: StepContext) -> StepResult {
    let task: TaskRequest = state.require_as(keys::TASK)?;

    let location = match (task.location, task.address.clone()) {
        (Some(point), _) => point,
        (None, Some(address)) => {
            let s = shared.clone();
            let input = address.clone();
            ctx.effect("intake.geocode", &input, move || async move {
                s.limited(MAPPING_DEPENDENCY, s.services.mapping.geocode(&address))
                    .await
            })
            .await?
        }
        (None, None) => {
            return Err(DispatchError::InvalidTask(
                "task needs a location or an address".to_string(),
            )
            .into())
        }
    };

    let mut context = Vec::new();
    if let Some(knowledge) = shared.services.knowledge.clone() {
        let limit = shared.settings.knowledge_limit;
        let query = task.description.clone();
        let s = shared.clone();
        let result: rescuegraph_core::Result<Vec<Value>> = ctx
            .effect(
                "intake.knowledge",
                &json!({"query": query, "limit": limit}),
                move || async move {
                    s.limited(KNOWLEDGE_DEPENDENCY, knowledge.query(&query, limit))
                        .await
                },
            )
            .await;
        match result {
            Ok(documents) => context = documents,
            Err(GraphError::Effect(e)) => {
                warn!(instance_id = %ctx.instance_id(), error = %e, "Knowledge query failed, continuing without context");
            }
            Err(other) => return Err(other),
        }
    }

    let mut out = StateRecord::new();
    out.set(keys::TASK_LOCATION, &location)?;
    out.set(keys::REQUIRED_CAPABILITIES, &task.required_capabilities)?;
    out.set(keys::CONTEXT, &context)?;
    Ok(out
        .with(keys::ERROR_COUNT, 0)
        .with(keys::DISPATCHED, json!({})))
}

fn allocate(state: StateRecord) -> StepResult {
    let location: GeoPoint = state.require_as(keys::TASK_LOCATION)?;
    let required: Vec<String> = state.get_as(keys::REQUIRED_CAPABILITIES)?.unwrap_or_default();
    let candidates: Vec<ResourceCandidate> = state.get_as(keys::CANDIDATES)?.unwrap_or_default();

    let ranked = rank_candidates(&required, location, &candidates);
    info!(
        candidates = candidates.len(),
        full_matches = ranked.iter().filter(|a| a.capability_match.is_full()).count(),
        "Candidates ranked"
    );

    let mut out = StateRecord::new();
    out.set(keys::ASSIGNMENTS, &ranked)?;
    Ok(out)
}

/// Route the shortlist concurrently and re-rank by travel time
async fn estimate_travel(shared: Arc<Shared>, state: StateRecord, ctx: StepContext) -> StepResult {
    let location: GeoPoint = state.require_as(keys::TASK_LOCATION)?;
    let assignments: Vec<Assignment> = state.require_as(keys::ASSIGNMENTS)?;

    let shortlist = assignments.iter().take(shared.settings.shortlist_size);
    let calls = shortlist.map(|assignment| {
        let s = shared.clone();
        let from = assignment.location;
        let input = json!({"candidate_id": assignment.candidate_id, "from": from, "to": location});
        let ctx = &ctx;
        async move {
            let estimate: rescuegraph_core::Result<RouteEstimate> = ctx
                .effect("estimate_travel.route", &input, move || async move {
                    s.limited(MAPPING_DEPENDENCY, s.services.mapping.route(from, location))
                        .await
                })
                .await;
            (assignment.candidate_id.clone(), estimate)
        }
    });

    let mut travel_times = HashMap::new();
    for (candidate_id, estimate) in join_all(calls).await {
        match estimate {
            Ok(route) => {
                travel_times.insert(candidate_id, route.duration_secs);
            }
            Err(GraphError::Effect(e)) => {
                warn!(candidate_id = %candidate_id, error = %e, "No travel estimate, ranking by distance");
            }
            Err(other) => return Err(other),
        }
    }

    let refined = refine_with_travel_times(assignments, &travel_times);
    let mut out = StateRecord::new();
    out.set(keys::ASSIGNMENTS, &refined)?;
    Ok(out)
}

/// Offer the shortlist to a human; continue with the chosen units
async fn approve(shared: Arc<Shared>, state: StateRecord, ctx: StepContext) -> StepResult {
    if let Some(choices) = ctx.decision() {
        info!(instance_id = %ctx.instance_id(), units = ?choices, "Units approved");
        return Ok(StateRecord::new().with(keys::APPROVED_UNITS, json!(choices)));
    }

    let task: TaskRequest = state.require_as(keys::TASK)?;
    let assignments: Vec<Assignment> = state.require_as(keys::ASSIGNMENTS)?;
    let shortlist: Vec<&Assignment> = assignments
        .iter()
        .take(shared.settings.shortlist_size)
        .collect();

    let options: Vec<Value> = shortlist
        .iter()
        .map(|a| {
            json!({
                "id": a.candidate_id,
                "capability_match": a.capability_match,
                "distance_km": a.distance_km,
                "travel_time_secs": a.travel_time_secs,
            })
        })
        .collect();

    let mut request = SuspendRequest::new(
        json!({
            "question": "Select the units to dispatch",
            "task": task.description,
            "required_capabilities": task.required_capabilities,
            "options": options,
        }),
        shortlist.iter().map(|a| a.candidate_id.clone()),
    )
    .with_decision_key(keys::APPROVED_UNITS);
    if let Some(ttl) = shared.settings.approval_ttl() {
        request = request.with_ttl(ttl);
    }
    ctx.suspend(request)
}

/// Send a command to every approved unit not yet acknowledged
async fn dispatch(shared: Arc<Shared>, state: StateRecord, ctx: StepContext) -> StepResult {
    let task_id: String = state.require_as("task_id")?;
    let task: TaskRequest = state.require_as(keys::TASK)?;
    let destination: GeoPoint = state.require_as(keys::TASK_LOCATION)?;
    let approved: Vec<String> = state.require_as(keys::APPROVED_UNITS)?;
    let mut dispatched: BTreeMap<String, DispatchAck> =
        state.get_as(keys::DISPATCHED)?.unwrap_or_default();
    let mut error_count: u64 = state.get_as(keys::ERROR_COUNT)?.unwrap_or_default();

    let pending: Vec<String> = approved
        .into_iter()
        .filter(|id| !dispatched.contains_key(id))
        .collect();

    let mut failure: Option<(String, bool)> = None;
    for unit_id in pending {
        let command = DispatchCommand {
            unit_id: unit_id.clone(),
            task_id: task_id.clone(),
            destination,
            instructions: task.description.clone(),
        };
        let s = shared.clone();
        let cmd = command.clone();
        let result: rescuegraph_core::Result<DispatchAck> = ctx
            .effects()
            .call_typed("dispatch.command", &command, move || async move {
                match s
                    .services
                    .limits
                    .run(DEVICE_DEPENDENCY, s.services.gateway.dispatch(&cmd))
                    .await
                {
                    Ok(sent) => sent.map_err(device_effect_error),
                    Err(e) => Err(EffectError::new("dispatch.command", e.to_string()).retryable()),
                }
            })
            .await;

        match result {
            Ok(ack) => {
                dispatched.insert(unit_id, ack);
            }
            Err(GraphError::Effect(e)) => {
                warn!(unit_id = %unit_id, error = %e, retryable = e.retryable, "Dispatch failed");
                let permanent = !e.retryable || failure.as_ref().map_or(false, |(_, p)| *p);
                failure = Some((e.message, permanent));
            }
            Err(other) => return Err(other),
        }
    }

    let mut out = StateRecord::new();
    out.set(keys::DISPATCHED, &dispatched)?;
    match failure {
        None => Ok(out
            .with(keys::DISPATCH_STATUS, "ok")
            .with(keys::LAST_ERROR, Value::Null)),
        Some((message, permanent)) => {
            error_count += 1;
            Ok(out
                .with(keys::DISPATCH_STATUS, if permanent { "rejected" } else { "failed" })
                .with(keys::ERROR_COUNT, error_count)
                .with(keys::LAST_ERROR, message))
        }
    }
}

fn device_effect_error(err: DeviceError) -> EffectError {
    let effect = EffectError::new("dispatch.command", err.to_string());
    if err.is_retryable() {
        effect.retryable()
    } else {
        effect
    }
}

async fn handle_dispatch_error(shared: Arc<Shared>, state: StateRecord) -> StepResult {
    let attempt: u32 = state.get_as(keys::ERROR_COUNT)?.unwrap_or_default();
    let last_error: Option<String> = state.get_as(keys::LAST_ERROR)?;
    let delay = shared.settings.retry_backoff(attempt);

    warn!(
        attempt,
        max_retries = shared.settings.max_dispatch_retries,
        last_error = last_error.as_deref().unwrap_or_default(),
        delay = %tooling::logging::format_duration(delay),
        "Retrying dispatch"
    );
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(StateRecord::new().with(keys::DISPATCH_STATUS, "retrying"))
}

/// Summarize the run, with a language model when one is configured
async fn report(shared: Arc<Shared>, state: StateRecord, ctx: StepContext) -> StepResult {
    let task_id: String = state.require_as("task_id")?;
    let assignments: Vec<Assignment> = state.get_as(keys::ASSIGNMENTS)?.unwrap_or_default();
    let dispatched: BTreeMap<String, DispatchAck> =
        state.get_as(keys::DISPATCHED)?.unwrap_or_default();
    let status: Option<String> = state.get_as(keys::DISPATCH_STATUS)?;
    let last_error: Option<String> = state.get_as(keys::LAST_ERROR)?;

    let outcome = if assignments.is_empty() {
        "no_candidates"
    } else if status.as_deref() == Some("ok") {
        "dispatched"
    } else {
        "dispatch_failed"
    };
    let units: Vec<&String> = dispatched.keys().collect();

    let mut summary = format!("Task {}: {}.", task_id, outcome.replace('_', " "));
    if !units.is_empty() {
        let names: Vec<&str> = units.iter().map(|u| u.as_str()).collect();
        summary.push_str(&format!(" Units: {}.", names.join(", ")));
    }
    if outcome == "dispatch_failed" {
        if let Some(error) = &last_error {
            summary.push_str(&format!(" Last error: {}.", error));
        }
    }

    let mut generated_by = "template".to_string();
    if let Some(pool) = shared
        .services
        .models
        .as_ref()
        .and_then(|models| models.get(&shared.settings.report_scope))
        .filter(|pool| !pool.is_empty())
    {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You write short, factual incident dispatch reports for emergency coordinators.",
            ),
            ChatMessage::user(format!(
                "Write a two-sentence report.\nFacts: {}\nCandidates considered: {}",
                summary,
                assignments.len()
            )),
        ])
        .with_temperature(0.2);

        let completion = shared
            .services
            .limits
            .run(
                LLM_DEPENDENCY,
                complete_once(ctx.effects(), "report.summary", &*pool, &request),
            )
            .await?;
        match completion {
            Ok(response) => {
                summary = response.content;
                generated_by = response.endpoint;
            }
            Err(GraphError::Effect(e)) => {
                warn!(instance_id = %ctx.instance_id(), error = %e, "Report model unavailable, using template");
            }
            Err(other) => return Err(other),
        }
    }

    info!(instance_id = %ctx.instance_id(), outcome, "Dispatch report written");
    Ok(StateRecord::new().with(keys::OUTCOME, outcome).with(
        keys::REPORT,
        json!({
            "summary": summary,
            "units": units,
            "generated_by": generated_by,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched_state(status: &str, errors: u64) -> StateRecord {
        StateRecord::new()
            .with(keys::DISPATCH_STATUS, status)
            .with(keys::ERROR_COUNT, errors)
    }

    #[test]
    fn test_dispatch_routing_is_bounded() {
        assert_eq!(route_after_dispatch(&dispatched_state("ok", 2), 3), "done");
        assert_eq!(route_after_dispatch(&dispatched_state("failed", 1), 3), "retry");
        assert_eq!(route_after_dispatch(&dispatched_state("failed", 3), 3), "retry");
        assert_eq!(route_after_dispatch(&dispatched_state("failed", 4), 3), "give_up");
        assert_eq!(route_after_dispatch(&dispatched_state("rejected", 1), 3), "give_up");
        assert_eq!(route_after_dispatch(&dispatched_state("failed", 1), 0), "give_up");
    }

    #[test]
    fn test_initial_state_carries_required_keys() {
        let task = TaskRequest {
            description: "Flooded basement".into(),
            required_capabilities: vec!["pump".into()],
            location: Some(GeoPoint::new(1.0, 2.0)),
            address: None,
        };
        let state = initial_state("t", "c", "th", &task, &[]).unwrap();
        assert!(state.require_keys(&rescuegraph_core::REQUIRED_KEYS).is_ok());
        assert_eq!(state.require_as::<TaskRequest>(keys::TASK).unwrap(), task);
    }

    #[test]
    fn test_graph_compiles() {
        let services = DispatchServices::new(
            Arc::new(crate::collaborators::StaticMappingService::new()),
            Arc::new(crate::collaborators::LoggingGateway),
        );
        let graph = rescue_dispatch_graph(services, DispatchSettings::default());
        assert!(graph.compile().is_ok());
    }
}
