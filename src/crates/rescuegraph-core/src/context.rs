//! Per-step execution context

use rescuegraph_checkpoint::Decision;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;

use crate::effect::EffectScope;
use crate::error::{GraphError, Result};
use crate::suspend::SuspendRequest;

/// What a step knows about the instance it runs in
///
/// Handed to every step invocation alongside the current state.
#[derive(Debug, Clone)]
pub struct StepContext {
    instance_id: String,
    namespace: String,
    step: String,
    step_index: u64,
    effects: EffectScope,
    decision: Option<Decision>,
}

impl StepContext {
    pub(crate) fn new(
        instance_id: impl Into<String>,
        namespace: impl Into<String>,
        step: impl Into<String>,
        step_index: u64,
        effects: EffectScope,
        decision: Option<Decision>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            namespace: namespace.into(),
            step: step.into(),
            step_index,
            effects,
            decision,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the step being executed
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Number of steps the instance completed before this one
    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn effects(&self) -> &EffectScope {
        &self.effects
    }

    /// Shorthand for `self.effects().call(..)`
    pub async fn effect<I, T, F, Fut, E>(&self, call_site_id: &str, input: &I, f: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.effects.call(call_site_id, input, f).await
    }

    /// Choice ids accepted by the resume that re-entered this step
    ///
    /// `None` on a first visit. A step that suspends should check this first and
    /// continue when a decision is present.
    pub fn decision(&self) -> Option<&[String]> {
        self.decision.as_ref().map(|d| d.choice_ids.as_slice())
    }

    /// Stop this step and wait for a human decision
    ///
    /// Returns the error the executor intercepts; use as `return ctx.suspend(request);`.
    pub fn suspend<T>(&self, request: SuspendRequest) -> Result<T> {
        Err(GraphError::Suspend(Box::new(request)))
    }
}
