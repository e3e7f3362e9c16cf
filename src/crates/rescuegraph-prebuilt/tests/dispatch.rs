use async_trait::async_trait;
use llm::{CompletionRequest, CompletionResponse, EndpointPool, EndpointRegistry, LanguageModel};
use rescuegraph_core::{EngineConfig, InstanceStatus, RunOutcome, StartOptions, WorkflowEngine};
use rescuegraph_prebuilt::{
    haversine_km, initial_state, keys, rescue_dispatch_graph, DeviceError, DeviceGateway,
    DispatchAck, DispatchCommand, DispatchError, DispatchServices, DispatchSettings, GeoPoint,
    MappingService, ResourceCandidate, RouteEstimate, StaticKnowledgeStore, TaskRequest,
    EARTH_RADIUS_KM, GRAPH_NAME,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Point `km` east of the origin along the equator
fn east(km: f64) -> GeoPoint {
    GeoPoint::new(0.0, (km / EARTH_RADIUS_KM).to_degrees())
}

/// Routes at 1 km per minute unless a duration is scripted for the origin
#[derive(Default)]
struct ScriptedMapping {
    durations: Vec<(GeoPoint, f64)>,
    failing: Vec<GeoPoint>,
    routes: AtomicUsize,
    geocodes: AtomicUsize,
}

#[async_trait]
impl MappingService for ScriptedMapping {
    async fn geocode(&self, address: &str) -> Result<GeoPoint, DispatchError> {
        self.geocodes.fetch_add(1, Ordering::SeqCst);
        match address {
            "1 Harbor Way" => Ok(east(0.0)),
            other => Err(DispatchError::Mapping(format!("unknown address '{}'", other))),
        }
    }

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate, DispatchError> {
        self.routes.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&from) {
            return Err(DispatchError::Mapping("no road".into()));
        }
        let distance_km = haversine_km(from, to);
        let duration_secs = self
            .durations
            .iter()
            .find(|(point, _)| *point == from)
            .map(|(_, secs)| *secs)
            .unwrap_or(distance_km * 60.0);
        Ok(RouteEstimate {
            distance_km,
            duration_secs,
        })
    }
}

/// Fails the first `failures` commands with `error`, then acknowledges
struct FlakyGateway {
    failures: usize,
    error: DeviceError,
    calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl FlakyGateway {
    fn new(failures: usize, error: DeviceError) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn reliable() -> Arc<Self> {
        Self::new(0, DeviceError::Unreachable(String::new()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceGateway for FlakyGateway {
    async fn dispatch(&self, command: &DispatchCommand) -> Result<DispatchAck, DeviceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        self.sent.lock().unwrap().push(command.unit_id.clone());
        Ok(DispatchAck {
            unit_id: command.unit_id.clone(),
            command_id: format!("cmd-{}", n),
            eta_secs: Some(300.0),
        })
    }
}

struct Scenario {
    engine: WorkflowEngine,
    mapping: Arc<ScriptedMapping>,
    gateway: Arc<FlakyGateway>,
}

fn settings() -> DispatchSettings {
    DispatchSettings {
        retry_backoff_ms: 0,
        ..DispatchSettings::default()
    }
}

fn scenario_with(
    mapping: ScriptedMapping,
    gateway: Arc<FlakyGateway>,
    settings: DispatchSettings,
    customize: impl FnOnce(DispatchServices) -> DispatchServices,
) -> Scenario {
    let mapping = Arc::new(mapping);
    let services = customize(DispatchServices::new(mapping.clone(), gateway.clone()));
    let engine = WorkflowEngine::new(EngineConfig::default());
    engine.register(rescue_dispatch_graph(services, settings).compile().unwrap());
    Scenario {
        engine,
        mapping,
        gateway,
    }
}

fn scenario(gateway: Arc<FlakyGateway>) -> Scenario {
    scenario_with(ScriptedMapping::default(), gateway, settings(), |s| s)
}

fn flood_task() -> TaskRequest {
    TaskRequest {
        description: "Flood rescue, two people on a roof".into(),
        required_capabilities: vec!["boat".into(), "medic".into()],
        location: Some(east(0.0)),
        address: None,
    }
}

fn fleet() -> Vec<ResourceCandidate> {
    vec![
        ResourceCandidate::new("boat-far", ["boat", "medic"], east(10.0)),
        ResourceCandidate::new("boat-near", ["boat", "medic"], east(1.0)),
        ResourceCandidate::new("boat-mid", ["boat", "medic"], east(5.0)),
        ResourceCandidate::new("truck", ["medic"], east(0.5)),
    ]
}

async fn start(s: &Scenario, task: &TaskRequest, units: &[ResourceCandidate]) -> RunOutcome {
    let state = initial_state("inc-1", "caller-1", "thread-1", task, units).unwrap();
    s.engine
        .start_workflow(GRAPH_NAME, state, StartOptions::new().instance_id("inc-1"))
        .await
        .unwrap()
}

fn choices(outcome: &RunOutcome) -> Vec<String> {
    outcome
        .suspension
        .as_ref()
        .map(|t| t.valid_choice_ids.clone())
        .unwrap_or_default()
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_suspends_with_ranked_shortlist_then_dispatches() {
    let s = scenario(FlakyGateway::reliable());

    let outcome = start(&s, &flood_task(), &fleet()).await;
    assert!(outcome.is_suspended());
    assert_eq!(choices(&outcome), ids(&["boat-near", "boat-mid", "boat-far"]));

    let ticket = outcome.suspension.unwrap();
    assert_eq!(ticket.step, "approve");
    assert_eq!(ticket.decision_key, keys::APPROVED_UNITS);
    assert_eq!(ticket.prompt_payload["options"][0]["capability_match"], "full");
    assert_eq!(s.mapping.routes.load(Ordering::SeqCst), 3);

    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near"]))
        .await
        .unwrap();
    assert!(done.is_completed());
    assert_eq!(done.state.get(keys::OUTCOME), Some(&json!("dispatched")));
    assert_eq!(done.state.get("report").unwrap()["generated_by"], "template");
    assert_eq!(*s.gateway.sent.lock().unwrap(), ids(&["boat-near"]));

    // Routes are not recomputed on resume
    assert_eq!(s.mapping.routes.load(Ordering::SeqCst), 3);
    let effects = s.engine.effects("inc-1").await.unwrap();
    assert_eq!(effects.len(), 4);
}

#[tokio::test]
async fn test_no_candidates_reports_without_suspending() {
    let s = scenario(FlakyGateway::reliable());

    let outcome = start(&s, &flood_task(), &[]).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get(keys::OUTCOME), Some(&json!("no_candidates")));
    assert_eq!(s.mapping.routes.load(Ordering::SeqCst), 0);
    assert_eq!(s.gateway.calls(), 0);
}

#[tokio::test]
async fn test_travel_time_reorders_shortlist() {
    // The nearest boat is across the river
    let mapping = ScriptedMapping {
        durations: vec![(east(1.0), 3600.0)],
        ..ScriptedMapping::default()
    };
    let s = scenario_with(mapping, FlakyGateway::reliable(), settings(), |s| s);

    let outcome = start(&s, &flood_task(), &fleet()).await;
    assert_eq!(choices(&outcome), ids(&["boat-mid", "boat-far", "boat-near"]));
}

#[tokio::test]
async fn test_failed_route_ranks_after_estimated() {
    let mapping = ScriptedMapping {
        failing: vec![east(1.0)],
        ..ScriptedMapping::default()
    };
    let s = scenario_with(mapping, FlakyGateway::reliable(), settings(), |s| s);

    let outcome = start(&s, &flood_task(), &fleet()).await;
    assert!(outcome.is_suspended());
    assert_eq!(choices(&outcome), ids(&["boat-mid", "boat-far", "boat-near"]));

    let assignments = outcome.state.get(keys::ASSIGNMENTS).unwrap().as_array().unwrap();
    let near = assignments
        .iter()
        .find(|a| a["candidate_id"] == "boat-near")
        .unwrap();
    assert!(near.get("travel_time_secs").is_none());
}

#[tokio::test]
async fn test_transient_dispatch_failures_are_retried() {
    let gateway = FlakyGateway::new(2, DeviceError::Unreachable("boat-near".into()));
    let s = scenario(gateway);

    start(&s, &flood_task(), &fleet()).await;
    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near"]))
        .await
        .unwrap();

    assert!(done.is_completed());
    assert_eq!(done.state.get(keys::OUTCOME), Some(&json!("dispatched")));
    assert_eq!(s.gateway.calls(), 3);
    assert_eq!(done.state.get(keys::ERROR_COUNT), Some(&json!(2)));

    let steps: Vec<String> = s
        .engine
        .history("inc-1")
        .await
        .unwrap()
        .iter()
        .filter_map(|cp| cp.payload.cursor.next_step.clone())
        .collect();
    assert_eq!(
        steps.iter().filter(|s| *s == "handle_dispatch_error").count(),
        2
    );
}

#[tokio::test]
async fn test_dispatch_retries_are_bounded() {
    let gateway = FlakyGateway::new(usize::MAX, DeviceError::Timeout("boat-near".into()));
    let bounded = DispatchSettings {
        max_dispatch_retries: 1,
        ..settings()
    };
    let s = scenario_with(ScriptedMapping::default(), gateway, bounded, |s| s);

    start(&s, &flood_task(), &fleet()).await;
    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near"]))
        .await
        .unwrap();

    assert!(done.is_completed());
    assert_eq!(done.state.get(keys::OUTCOME), Some(&json!("dispatch_failed")));
    assert_eq!(s.gateway.calls(), 2);
    let summary = done.state.get("report").unwrap()["summary"].as_str().unwrap().to_string();
    assert!(summary.contains("did not acknowledge"), "{summary}");
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let gateway = FlakyGateway::new(
        usize::MAX,
        DeviceError::Rejected {
            unit_id: "boat-near".into(),
            reason: "out of fuel".into(),
        },
    );
    let s = scenario(gateway);

    start(&s, &flood_task(), &fleet()).await;
    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near"]))
        .await
        .unwrap();

    assert_eq!(done.state.get(keys::OUTCOME), Some(&json!("dispatch_failed")));
    assert_eq!(s.gateway.calls(), 1);
}

#[tokio::test]
async fn test_partial_dispatch_keeps_acknowledged_units() {
    let gateway = FlakyGateway::new(1, DeviceError::Unreachable("boat-near".into()));
    let s = scenario(gateway);

    start(&s, &flood_task(), &fleet()).await;
    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near", "boat-mid"]))
        .await
        .unwrap();

    assert!(done.is_completed());
    // first attempt: near fails, mid acked; retry sends only near
    assert_eq!(s.gateway.calls(), 3);
    assert_eq!(*s.gateway.sent.lock().unwrap(), ids(&["boat-mid", "boat-near"]));
    let dispatched = done.state.get(keys::DISPATCHED).unwrap().as_object().unwrap();
    assert_eq!(dispatched.len(), 2);
}

#[tokio::test]
async fn test_address_is_geocoded_once() {
    let s = scenario(FlakyGateway::reliable());
    let task = TaskRequest {
        location: None,
        address: Some("1 Harbor Way".into()),
        ..flood_task()
    };

    let outcome = start(&s, &task, &fleet()).await;
    assert!(outcome.is_suspended());
    assert_eq!(s.mapping.geocodes.load(Ordering::SeqCst), 1);

    s.engine
        .resume_workflow("inc-1", &ids(&["boat-mid"]))
        .await
        .unwrap();
    assert_eq!(s.mapping.geocodes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_address_fails_the_instance() {
    let s = scenario(FlakyGateway::reliable());
    let task = TaskRequest {
        location: None,
        address: Some("Atlantis".into()),
        ..flood_task()
    };

    let outcome = start(&s, &task, &fleet()).await;
    assert_eq!(outcome.status, InstanceStatus::Failed);
    assert!(outcome.error.unwrap().contains("unknown address"));
}

#[tokio::test]
async fn test_task_without_location_fails() {
    let s = scenario(FlakyGateway::reliable());
    let task = TaskRequest {
        location: None,
        address: None,
        ..flood_task()
    };

    let outcome = start(&s, &task, &fleet()).await;
    assert!(outcome.is_failed());
    assert!(outcome.error.unwrap().contains("location or an address"));
}

#[tokio::test]
async fn test_knowledge_context_is_attached() {
    let knowledge = StaticKnowledgeStore::new()
        .with_document("flood water rescue protocol", json!({"id": "sop-flood"}))
        .with_document("wildfire protocol", json!({"id": "sop-fire"}));
    let s = scenario_with(
        ScriptedMapping::default(),
        FlakyGateway::reliable(),
        settings(),
        |services| services.with_knowledge(Arc::new(knowledge)),
    );

    let outcome = start(&s, &flood_task(), &fleet()).await;
    assert_eq!(
        outcome.state.get(keys::CONTEXT),
        Some(&json!([{"id": "sop-flood"}]))
    );
}

struct ReportModel {
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for ReportModel {
    fn name(&self) -> &str {
        "report-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> llm::Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let facts = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(CompletionResponse {
            content: format!("Model report. {}", facts.lines().nth(1).unwrap_or_default()),
            model: "mock".into(),
            endpoint: "report-model".into(),
            usage: None,
        })
    }
}

#[tokio::test]
async fn test_report_uses_language_model_when_configured() {
    let model = Arc::new(ReportModel {
        calls: AtomicUsize::new(0),
    });
    let mut pool = EndpointPool::new("report");
    pool.add(model.clone(), 0, 1);
    let mut registry = EndpointRegistry::new();
    registry.insert(pool);

    let s = scenario_with(
        ScriptedMapping::default(),
        FlakyGateway::reliable(),
        settings(),
        |services| services.with_models(registry),
    );

    start(&s, &flood_task(), &fleet()).await;
    let done = s
        .engine
        .resume_workflow("inc-1", &ids(&["boat-near"]))
        .await
        .unwrap();

    let report: &Value = done.state.get("report").unwrap();
    assert_eq!(report["generated_by"], "report-model");
    assert!(report["summary"].as_str().unwrap().starts_with("Model report."));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_decision_outside_shortlist_is_rejected() {
    let s = scenario(FlakyGateway::reliable());
    start(&s, &flood_task(), &fleet()).await;

    // The partial match is ranked but not shortlisted
    let err = s
        .engine
        .resume_workflow("inc-1", &ids(&["truck"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("truck"), "{err}");

    let view = s.engine.get_instance("inc-1").await.unwrap();
    assert_eq!(view.instance.status, InstanceStatus::Suspended);
    assert_eq!(s.gateway.calls(), 0);
}
