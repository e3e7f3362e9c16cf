//! Execution loop and the run / resume / recover entry points

use rescuegraph_checkpoint::{
    now_millis, Checkpoint, CheckpointPayload, Decision, InstanceStatus, StepCursor,
    SuspensionTicket, WorkflowInstance,
};
use serde_json::json;
use tooling::logging::{format_duration, timed};
use tooling::serialization::truncate_json;
use tracing::{debug, info, warn};

use super::types::{ExecutionOptions, RunConfig, RunOutcome};
use super::CompiledGraph;
use crate::context::StepContext;
use crate::durability::CheckpointWriter;
use crate::effect::EffectScope;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, END};
use crate::state::{StateRecord, REQUIRED_KEYS};
use crate::suspend::{validate_decision, SuspendRequest};

/// Error message recorded when a cancellation stops an instance
pub const CANCELLED_ERROR: &str = "cancelled";

/// Error message recorded when a suspension outlives its ticket
pub const EXPIRED_ERROR: &str = "suspension expired";

/// Position of the loop between steps
struct Position {
    step: String,
    index: u64,
    decision: Option<Decision>,
}

fn payload(
    state: &StateRecord,
    cursor: StepCursor,
    status: InstanceStatus,
    error: Option<String>,
    decision: Option<Decision>,
) -> CheckpointPayload {
    CheckpointPayload {
        state: state.to_value(),
        cursor,
        status,
        error,
        decision,
    }
}

fn outcome(
    instance_id: &str,
    status: InstanceStatus,
    state: StateRecord,
    suspension: Option<SuspensionTicket>,
    error: Option<String>,
) -> RunOutcome {
    RunOutcome {
        instance_id: instance_id.to_string(),
        status,
        state,
        suspension,
        error,
    }
}

impl CompiledGraph {
    /// Start a new instance
    ///
    /// The initial state must contain `task_id`, `caller_id` and `thread_id`.
    #[tracing::instrument(skip(self, initial, config), fields(graph = %self.name))]
    pub async fn run(&self, initial: StateRecord, config: RunConfig) -> Result<RunOutcome> {
        initial.require_keys(&REQUIRED_KEYS)?;
        let entry = self
            .graph
            .entry
            .clone()
            .ok_or_else(|| GraphError::Engine(format!("graph '{}' has no entry step", self.name)))?;

        let instance_id = config
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let instance = WorkflowInstance::new(&instance_id, &config.namespace, &self.name)
            .with_durability(config.options.durability);
        self.checkpoints.create_instance(&instance).await?;
        info!(instance_id = %instance_id, namespace = %config.namespace, "Starting workflow");

        let mut writer = CheckpointWriter::new(
            self.checkpoints.clone(),
            config.options.durability,
            &instance_id,
            &config.namespace,
            None,
        );
        writer
            .intermediate(payload(
                &initial,
                StepCursor::at(&entry, 0),
                InstanceStatus::Running,
                None,
                None,
            ))
            .await?;

        let position = Position {
            step: entry,
            index: 0,
            decision: None,
        };
        self.execute(&instance_id, &config.namespace, initial, position, writer, &config.options)
            .await
    }

    /// Continue a suspended instance with a human decision
    ///
    /// Fails with `NoPendingSuspension` when there is no live ticket (never suspended,
    /// already resumed, or expired) and with `Validation` when `decision` is empty or
    /// names an id that was not offered. A rejected decision changes nothing.
    #[tracing::instrument(skip(self, decision, options), fields(graph = %self.name))]
    pub async fn resume(
        &self,
        instance_id: &str,
        decision: &[String],
        options: &ExecutionOptions,
    ) -> Result<RunOutcome> {
        let instance = self.load_instance(instance_id).await?;

        let Some(ticket) = self.checkpoints.get_ticket(instance_id).await? else {
            return Err(GraphError::NoPendingSuspension(instance_id.to_string()));
        };

        if ticket.is_expired() {
            self.expire(&instance, &ticket).await?;
            return Err(GraphError::NoPendingSuspension(instance_id.to_string()));
        }

        let accepted = validate_decision(&ticket.valid_choice_ids, decision)?;

        let latest = self.checkpoints.load_latest(instance_id).await?.ok_or_else(|| {
            GraphError::Engine(format!("suspended instance {} has no checkpoint", instance_id))
        })?;
        let mut state = StateRecord::from_value(latest.payload.state.clone())?;
        state.insert(ticket.decision_key.clone(), json!(accepted));
        let decision = Decision {
            key: ticket.decision_key.clone(),
            choice_ids: accepted,
        };

        let index = latest.payload.cursor.step_index;
        let resumed = Checkpoint::new(
            instance_id,
            instance.namespace.clone(),
            Some(latest.checkpoint_id.clone()),
            payload(
                &state,
                StepCursor::at(&ticket.step, index),
                InstanceStatus::Running,
                None,
                Some(decision.clone()),
            ),
        );
        if !self.checkpoints.save_resumed(&resumed).await? {
            return Err(GraphError::NoPendingSuspension(instance_id.to_string()));
        }
        info!(
            instance_id,
            step = %ticket.step,
            choices = ?decision.choice_ids,
            "Resuming workflow"
        );

        let writer = CheckpointWriter::new(
            self.checkpoints.clone(),
            options.durability,
            instance_id,
            &instance.namespace,
            Some(resumed.checkpoint_id),
        );
        let position = Position {
            step: ticket.step,
            index,
            decision: Some(decision),
        };
        self.execute(instance_id, &instance.namespace, state, position, writer, options)
            .await
    }

    /// Re-enter a `running` instance from its latest checkpoint
    ///
    /// The step at the checkpoint's cursor runs again; effects it already completed
    /// are replayed from their records.
    #[tracing::instrument(skip(self, options), fields(graph = %self.name))]
    pub async fn recover(&self, instance_id: &str, options: &ExecutionOptions) -> Result<RunOutcome> {
        let instance = self.load_instance(instance_id).await?;
        if instance.status != InstanceStatus::Running {
            return Err(GraphError::InvalidStatus {
                instance_id: instance_id.to_string(),
                status: instance.status,
                expected: "running",
            });
        }

        let latest = self.checkpoints.load_latest(instance_id).await?.ok_or_else(|| {
            GraphError::Engine(format!(
                "instance {} has no durable checkpoint to recover from",
                instance_id
            ))
        })?;
        let step = latest.payload.cursor.next_step.clone().ok_or_else(|| {
            GraphError::Engine(format!(
                "latest checkpoint of {} has no next step",
                instance_id
            ))
        })?;
        let state = StateRecord::from_value(latest.payload.state.clone())?;
        info!(
            instance_id,
            step = %step,
            checkpoint_id = %latest.checkpoint_id,
            "Recovering workflow"
        );

        let writer = CheckpointWriter::new(
            self.checkpoints.clone(),
            options.durability,
            instance_id,
            &instance.namespace,
            Some(latest.checkpoint_id.clone()),
        );
        let position = Position {
            step,
            index: latest.payload.cursor.step_index,
            decision: latest.payload.decision,
        };
        self.execute(instance_id, &instance.namespace, state, position, writer, options)
            .await
    }

    async fn load_instance(&self, instance_id: &str) -> Result<WorkflowInstance> {
        self.checkpoints
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| GraphError::InstanceNotFound(instance_id.to_string()))
    }

    /// Drop an expired ticket and fail the instance; only the caller that takes the
    /// ticket writes the checkpoint
    async fn expire(&self, instance: &WorkflowInstance, ticket: &SuspensionTicket) -> Result<()> {
        if !self.checkpoints.take_ticket(&instance.instance_id).await? {
            return Ok(());
        }
        let latest = self.checkpoints.load_latest(&instance.instance_id).await?;
        let (state, cursor, parent) = match latest {
            Some(cp) => (cp.payload.state, cp.payload.cursor, Some(cp.checkpoint_id)),
            None => (json!({}), StepCursor::at(&ticket.step, 0), None),
        };
        let failed = Checkpoint::new(
            instance.instance_id.clone(),
            instance.namespace.clone(),
            parent,
            CheckpointPayload {
                state,
                cursor,
                status: InstanceStatus::Failed,
                error: Some(EXPIRED_ERROR.to_string()),
                decision: None,
            },
        );
        self.checkpoints.save(&failed, InstanceStatus::Failed).await?;
        warn!(instance_id = %instance.instance_id, step = %ticket.step, "Suspension expired");
        Ok(())
    }

    /// Pick the step after `step` given the updated state
    fn route(&self, step: &str, state: &StateRecord) -> Result<String> {
        match self.graph.edge(step) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, branches }) => {
                let label = router(state);
                branches
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownBranch {
                        step: step.to_string(),
                        label,
                    })
            }
            None => Err(GraphError::Engine(format!("step '{}' has no outgoing edge", step))),
        }
    }

    #[tracing::instrument(
        skip(self, state, position, writer, options),
        fields(graph = %self.name, durability = %writer.mode())
    )]
    async fn execute(
        &self,
        instance_id: &str,
        namespace: &str,
        mut state: StateRecord,
        mut position: Position,
        mut writer: CheckpointWriter,
        options: &ExecutionOptions,
    ) -> Result<RunOutcome> {
        loop {
            if options.cancel.is_cancelled() {
                return cancelled(instance_id, state, &position, &mut writer).await;
            }

            let spec = self.graph.steps.get(&position.step).ok_or_else(|| {
                GraphError::Engine(format!("cursor points at unknown step '{}'", position.step))
            })?;
            let ctx = StepContext::new(
                instance_id,
                namespace,
                &position.step,
                position.index,
                EffectScope::new(instance_id, self.effects.clone()),
                position.decision.clone(),
            );

            debug!(step = %position.step, step_index = position.index, "Executing step");
            let (result, elapsed) =
                timed(&position.step, (spec.executor)(state.clone(), ctx)).await;

            let error = match result {
                Ok(partial) => {
                    let mut next_state = state.clone();
                    next_state.merge(partial);

                    match self.route(&position.step, &next_state) {
                        Ok(next) => {
                            debug!(
                                step = %position.step,
                                next = %next,
                                elapsed = %format_duration(elapsed),
                                "Step completed"
                            );
                            state = next_state;
                            position.index += 1;
                            position.decision = None;

                            if next == END {
                                return self
                                    .complete(instance_id, state, position.index, &mut writer, options)
                                    .await;
                            }

                            position.step = next;
                            // Signalled mid-step: stop without a runnable cursor
                            if options.cancel.is_cancelled() {
                                return cancelled(instance_id, state, &position, &mut writer).await;
                            }

                            let cursor = StepCursor::at(&position.step, position.index);
                            let checkpoint =
                                payload(&state, cursor, InstanceStatus::Running, None, None);
                            if let Err(e) = writer.intermediate(checkpoint).await {
                                return Err(abandon(&mut writer, e).await);
                            }
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Err(GraphError::Suspend(_)) if options.cancel.is_cancelled() => {
                    return cancelled(instance_id, state, &position, &mut writer).await;
                }
                Err(GraphError::Suspend(request)) => {
                    return self
                        .suspend(instance_id, state, &position, *request, &mut writer, options)
                        .await;
                }
                Err(e) if e.is_persistence() => return Err(abandon(&mut writer, e).await),
                Err(e) => e,
            };

            let message = GraphError::StepFailed {
                step: position.step.clone(),
                error: error.to_string(),
            }
            .to_string();
            warn!(step = %position.step, error = %message, "Workflow failed");
            let cursor = StepCursor::at(&position.step, position.index);
            writer
                .finish(
                    payload(&state, cursor, InstanceStatus::Failed, Some(message.clone()), None),
                    InstanceStatus::Failed,
                )
                .await?;
            return Ok(outcome(instance_id, InstanceStatus::Failed, state, None, Some(message)));
        }
    }

    async fn complete(
        &self,
        instance_id: &str,
        state: StateRecord,
        index: u64,
        writer: &mut CheckpointWriter,
        options: &ExecutionOptions,
    ) -> Result<RunOutcome> {
        let checkpoint_id = writer
            .finish(
                payload(&state, StepCursor::finished(index), InstanceStatus::Completed, None, None),
                InstanceStatus::Completed,
            )
            .await?;
        info!(instance_id, checkpoint_id = %checkpoint_id, steps = index, "Workflow completed");

        if let Some(keep) = options.checkpoint_retention {
            match self.checkpoints.prune(instance_id, keep).await {
                Ok(removed) => debug!(instance_id, removed, "Pruned checkpoints"),
                Err(e) => warn!(instance_id, error = %e, "Checkpoint pruning failed"),
            }
        }
        Ok(outcome(instance_id, InstanceStatus::Completed, state, None, None))
    }

    /// Persist a suspension; the stored state is the one the step was entered with
    async fn suspend(
        &self,
        instance_id: &str,
        state: StateRecord,
        position: &Position,
        request: SuspendRequest,
        writer: &mut CheckpointWriter,
        options: &ExecutionOptions,
    ) -> Result<RunOutcome> {
        let cursor = StepCursor::at(&position.step, position.index);

        if request.valid_choice_ids.is_empty() {
            let message = GraphError::StepFailed {
                step: position.step.clone(),
                error: "suspension offered no choices".to_string(),
            }
            .to_string();
            writer
                .finish(
                    payload(&state, cursor, InstanceStatus::Failed, Some(message.clone()), None),
                    InstanceStatus::Failed,
                )
                .await?;
            return Ok(outcome(instance_id, InstanceStatus::Failed, state, None, Some(message)));
        }

        let created_at = now_millis();
        let expires_at = match request.ttl.or(options.suspension_ttl) {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
                    GraphError::Engine(format!("invalid suspension ttl: {}", e))
                })?;
                Some(created_at + ttl)
            }
            None => None,
        };
        let ticket = SuspensionTicket {
            instance_id: instance_id.to_string(),
            step: position.step.clone(),
            prompt_payload: request.payload,
            valid_choice_ids: request.valid_choice_ids,
            decision_key: request.decision_key,
            created_at,
            expires_at,
        };

        writer
            .suspend(
                payload(&state, cursor, InstanceStatus::Suspended, None, None),
                &ticket,
            )
            .await?;
        info!(
            instance_id,
            step = %ticket.step,
            choices = ticket.valid_choice_ids.len(),
            "Workflow suspended"
        );
        debug!(
            instance_id,
            payload = %truncate_json(&ticket.prompt_payload, 120),
            "Suspension payload"
        );
        Ok(outcome(instance_id, InstanceStatus::Suspended, state, Some(ticket), None))
    }
}

/// Record a cancellation at `position`; no ticket is written, so nothing can resume it
async fn cancelled(
    instance_id: &str,
    state: StateRecord,
    position: &Position,
    writer: &mut CheckpointWriter,
) -> Result<RunOutcome> {
    info!(instance_id, step = %position.step, "Cancellation observed, stopping");
    let cursor = StepCursor::at(&position.step, position.index);
    writer
        .finish(
            payload(
                &state,
                cursor,
                InstanceStatus::Failed,
                Some(CANCELLED_ERROR.to_string()),
                None,
            ),
            InstanceStatus::Failed,
        )
        .await?;
    Ok(outcome(
        instance_id,
        InstanceStatus::Failed,
        state,
        None,
        Some(CANCELLED_ERROR.to_string()),
    ))
}

/// Stop after a persistence failure; the instance stays `running` for `recover`
async fn abandon(writer: &mut CheckpointWriter, error: GraphError) -> GraphError {
    if let Err(flush_error) = writer.flush().await {
        warn!(error = %flush_error, "Queued checkpoints lost");
    }
    warn!(error = %error, "Checkpoint write failed, instance left running");
    error
}
