mod common;

use common::{counted_graph, initial_state, Calls, FailingStore};
use rescuegraph_checkpoint::{CheckpointStore, EffectStore, InstanceStatus};
use rescuegraph_core::{
    CompiledGraph, Durability, ExecutionOptions, GraphError, RunConfig, StateRecord,
};
use serde_json::Value;
use std::sync::Arc;

struct Baseline {
    state: StateRecord,
    effects: Vec<(String, Value)>,
}

async fn effect_results(compiled: &CompiledGraph, instance_id: &str) -> Vec<(String, Value)> {
    compiled
        .effect_store()
        .list_effects(instance_id)
        .await
        .unwrap()
        .into_iter()
        .map(|record| (record.call_site_id, record.result))
        .collect()
}

async fn baseline() -> Baseline {
    let compiled = counted_graph(&Calls::default()).compile().unwrap();
    let outcome = compiled
        .run(initial_state(), RunConfig::new().with_instance_id("wf"))
        .await
        .unwrap();
    Baseline {
        state: outcome.state,
        effects: effect_results(&compiled, "wf").await,
    }
}

/// Fail the n-th checkpoint write, recover, and compare with an uninterrupted run
async fn crash_and_recover(durability: Durability, fail_at: usize) {
    let expected = baseline().await;
    let calls = Calls::default();
    let store = Arc::new(FailingStore::failing_at(fail_at));
    let compiled = counted_graph(&calls).compile().unwrap().with_store(store.clone());

    let err = compiled
        .run(
            initial_state(),
            RunConfig::new()
                .with_instance_id("wf")
                .with_durability(durability),
        )
        .await
        .unwrap_err();
    assert!(err.is_persistence(), "save {}: {}", fail_at, err);

    let instance = store.get_instance("wf").await.unwrap().unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);

    let options = ExecutionOptions::new().with_durability(durability);
    let outcome = compiled.recover("wf", &options).await.unwrap();

    assert!(outcome.is_completed(), "save {}: {:?}", fail_at, outcome);
    assert_eq!(outcome.state, expected.state, "save {}", fail_at);
    assert_eq!(effect_results(&compiled, "wf").await, expected.effects);
    assert_eq!(calls.fetch(), 1, "fetch replayed after save {}", fail_at);
    assert_eq!(calls.notify(), 1, "notify replayed after save {}", fail_at);
}

// Save 1 is the initial checkpoint; see test_failed_initial_checkpoint_is_not_recoverable
#[tokio::test]
async fn test_resume_equivalence_sync() {
    for fail_at in 2..=4 {
        crash_and_recover(Durability::Sync, fail_at).await;
    }
}

#[tokio::test]
async fn test_resume_equivalence_async() {
    for fail_at in 2..=4 {
        crash_and_recover(Durability::Async, fail_at).await;
    }
}

#[tokio::test]
async fn test_sync_failure_stops_before_next_step() {
    let calls = Calls::default();
    // Save 2 is the checkpoint after `fetch`
    let store = Arc::new(FailingStore::failing_at(2));
    let compiled = counted_graph(&calls).compile().unwrap().with_store(store.clone());

    compiled
        .run(initial_state(), RunConfig::new().with_instance_id("wf"))
        .await
        .unwrap_err();

    assert_eq!(calls.fetch(), 1);
    assert_eq!(calls.notify(), 0);
    let latest = store.load_latest("wf").await.unwrap().unwrap();
    assert_eq!(latest.payload.cursor.next_step.as_deref(), Some("fetch"));
}

#[tokio::test]
async fn test_failed_initial_checkpoint_is_not_recoverable() {
    let store = Arc::new(FailingStore::failing_at(1));
    let compiled = counted_graph(&Calls::default())
        .compile()
        .unwrap()
        .with_store(store.clone());

    let err = compiled
        .run(initial_state(), RunConfig::new().with_instance_id("wf"))
        .await
        .unwrap_err();
    assert!(err.is_persistence());

    let err = compiled
        .recover("wf", &ExecutionOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Engine(msg) if msg.contains("no durable checkpoint")));
}

#[tokio::test]
async fn test_recover_rejects_non_running_instances() {
    let compiled = counted_graph(&Calls::default()).compile().unwrap();
    compiled
        .run(initial_state(), RunConfig::new().with_instance_id("wf"))
        .await
        .unwrap();

    let err = compiled
        .recover("wf", &ExecutionOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GraphError::InvalidStatus { status: InstanceStatus::Completed, .. }
    ));

    assert!(matches!(
        compiled.recover("ghost", &ExecutionOptions::new()).await,
        Err(GraphError::InstanceNotFound(_))
    ));
}

#[tokio::test]
async fn test_wrapped_call_runs_at_most_once_per_identity() {
    let calls = Calls::default();
    let store = Arc::new(FailingStore::default());
    let compiled = counted_graph(&calls).compile().unwrap().with_store(store.clone());

    compiled
        .run(initial_state(), RunConfig::new().with_instance_id("a"))
        .await
        .unwrap();
    compiled
        .run(initial_state(), RunConfig::new().with_instance_id("b"))
        .await
        .unwrap();

    // Identity includes the instance, so each instance calls once
    assert_eq!((calls.fetch(), calls.notify()), (2, 2));
    assert_eq!(store.list_effects("a").await.unwrap().len(), 2);
    assert_eq!(store.saves(), 8);
}
