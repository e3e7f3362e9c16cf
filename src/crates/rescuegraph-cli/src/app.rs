//! Command handlers
//!
//! Each handler returns a JSON document that `main` prints. Keeping them here
//! rather than in `main` lets integration tests drive full start/resume cycles
//! against a SQLite file.

use anyhow::{Context, Result};
use llm::EndpointRegistry;
use rescuegraph_core::{
    CancelOutcome, Durability, InstanceStatus, RunOutcome, StartOptions, WorkflowEngine,
};
use rescuegraph_prebuilt::{
    initial_state, keys, rescue_dispatch_graph, DispatchServices, LoggingGateway,
    ResourceCandidate, TaskRequest, GRAPH_NAME,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::CliConfig;

/// Contents of an incident file passed to `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentFile {
    /// Defaults to a generated id
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default = "default_caller")]
    pub caller_id: String,
    /// Defaults to the task id
    #[serde(default)]
    pub thread_id: Option<String>,
    pub task: TaskRequest,
    pub candidates: Vec<ResourceCandidate>,
}

fn default_caller() -> String {
    "cli".to_string()
}

impl IncidentFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read incident file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid incident file {}", path.display()))
    }
}

/// The engine with the dispatch workflow registered
pub struct App {
    engine: WorkflowEngine,
}

impl App {
    pub async fn connect(config: CliConfig) -> Result<Self> {
        let models = EndpointRegistry::from_configs(&config.llm.endpoints)
            .context("Invalid LLM endpoint configuration")?;
        let services = DispatchServices::new(
            Arc::new(config.mapping_service()),
            Arc::new(LoggingGateway),
        )
        .with_models(models)
        .with_limits(config.limits.to_limits());

        let graph = rescue_dispatch_graph(services, config.dispatch.clone()).compile()?;
        let engine = WorkflowEngine::connect(config.engine.clone()).await?;
        engine.register(graph);
        info!(graphs = ?engine.graph_names(), "Engine ready");
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub async fn start(
        &self,
        incident: IncidentFile,
        instance_id: Option<String>,
        durability: Option<Durability>,
    ) -> Result<Value> {
        let task_id = incident
            .task_id
            .clone()
            .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4().simple()));
        let thread_id = incident.thread_id.clone().unwrap_or_else(|| task_id.clone());
        let state = initial_state(
            &task_id,
            &incident.caller_id,
            &thread_id,
            &incident.task,
            &incident.candidates,
        )?;

        let mut options = StartOptions::new();
        if let Some(instance_id) = instance_id {
            options = options.instance_id(instance_id);
        }
        if let Some(durability) = durability {
            options = options.durability(durability);
        }
        let outcome = self.engine.start_workflow(GRAPH_NAME, state, options).await?;
        Ok(outcome_json(&outcome))
    }

    pub async fn resume(&self, instance_id: &str, choices: &[String]) -> Result<Value> {
        let outcome = self.engine.resume_workflow(instance_id, choices).await?;
        Ok(outcome_json(&outcome))
    }

    pub async fn recover(&self, instance_id: &str) -> Result<Value> {
        let outcome = self.engine.recover(instance_id, None).await?;
        Ok(outcome_json(&outcome))
    }

    pub async fn status(&self, instance_id: &str) -> Result<Value> {
        let view = self.engine.get_instance(instance_id).await?;
        Ok(json!({
            "instance": view.instance,
            "cursor": view.cursor,
            "error": view.error,
            "ticket": view.ticket,
            "state": view.state,
        }))
    }

    pub async fn history(&self, instance_id: &str, with_effects: bool) -> Result<Value> {
        let checkpoints = self.engine.history(instance_id).await?;
        let mut document = json!({
            "instance_id": instance_id,
            "checkpoints": checkpoints,
        });
        if with_effects {
            document["effects"] = serde_json::to_value(self.engine.effects(instance_id).await?)?;
        }
        Ok(document)
    }

    pub async fn cancel(&self, instance_id: &str) -> Result<Value> {
        let outcome = self.engine.cancel_workflow(instance_id).await?;
        let result = match outcome {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::Signalled => "signalled",
        };
        Ok(json!({ "instance_id": instance_id, "result": result }))
    }

    pub async fn list(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Value> {
        let instances = self.engine.list_instances(namespace, status).await?;
        Ok(json!({ "count": instances.len(), "instances": instances }))
    }
}

/// Summary of a run: status, ticket or error, and the dispatch results so far
pub fn outcome_json(outcome: &RunOutcome) -> Value {
    let mut document = json!({
        "instance_id": outcome.instance_id,
        "status": outcome.status,
    });
    if let Some(ticket) = &outcome.suspension {
        document["suspension"] = json!({
            "step": ticket.step,
            "options": ticket.prompt_payload,
            "valid_choice_ids": ticket.valid_choice_ids,
            "expires_at": ticket.expires_at,
        });
    }
    if let Some(error) = &outcome.error {
        document["error"] = json!(error);
    }
    for key in [keys::OUTCOME, keys::DISPATCHED, keys::REPORT] {
        if let Some(value) = outcome.state.get(key) {
            document[key] = value.clone();
        }
    }
    document
}
