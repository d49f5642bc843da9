//! Deterministic test doubles for the planner and orchestrator.
//!
//! [`MockExecutor`] stands in for the capability executor with scripted
//! per-capability outcomes; [`ScriptedPrinciples`] answers admissibility
//! queries without a network. Both are built with the builder conventions
//! the integration tests share.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::executor::CapabilityExecutor;
use synapse_kernel::plan::Plan;
use synapse_kernel::principles::{PrinciplesGate, PrinciplesVerdict};
use tokio_util::sync::CancellationToken;

/// One scripted response for a capability id.
#[derive(Debug, Clone)]
enum Scripted {
    Ok(Value),
    Fail(String),
}

/// A recorded executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub workflow_id: String,
    pub capability_id: String,
    pub args: HashMap<String, Value>,
}

/// Builder for [`MockExecutor`].
#[derive(Default)]
pub struct MockExecutorBuilder {
    scripts: HashMap<String, VecDeque<Scripted>>,
    default_outcome: Option<Scripted>,
    delay: Option<Duration>,
}

impl MockExecutorBuilder {
    /// Result returned for any call without a matching script.
    pub fn default_result(mut self, value: Value) -> Self {
        self.default_outcome = Some(Scripted::Ok(value));
        self
    }

    /// Make every unscripted call fail with `message`.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.default_outcome = Some(Scripted::Fail(message.into()));
        self
    }

    /// Queue a success for the given capability id.
    pub fn ok_for(mut self, capability_id: impl Into<String>, value: Value) -> Self {
        self.scripts
            .entry(capability_id.into())
            .or_default()
            .push_back(Scripted::Ok(value));
        self
    }

    /// Queue a failure for the given capability id.
    pub fn fail_for(mut self, capability_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.scripts
            .entry(capability_id.into())
            .or_default()
            .push_back(Scripted::Fail(message.into()));
        self
    }

    /// Queue `n` failures, then one success, for the given capability id.
    pub fn fail_times_then_ok(
        mut self,
        capability_id: impl Into<String>,
        n: usize,
        value: Value,
    ) -> Self {
        let capability_id = capability_id.into();
        for attempt in 0..n {
            self = self.fail_for(&capability_id, format!("scripted failure {}", attempt + 1));
        }
        self.ok_for(capability_id, value)
    }

    /// Sleep this long before answering (observes cancellation).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> MockExecutor {
        MockExecutor {
            scripts: Mutex::new(self.scripts),
            default_outcome: self.default_outcome.unwrap_or(Scripted::Ok(json!({
                "status": "ok"
            }))),
            delay: self.delay,
            calls: Mutex::new(Vec::new()),
        }
    }
}

/// Capability executor with scripted outcomes, keyed by the first step's
/// capability id. Scripts are consumed in order; exhausted or unscripted
/// capabilities fall back to the default outcome.
pub struct MockExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    default_outcome: Scripted,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    pub fn builder() -> MockExecutorBuilder {
        MockExecutorBuilder::default()
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of invocations seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_outcome(&self, capability_id: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .get_mut(capability_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl CapabilityExecutor for MockExecutor {
    async fn execute_plan(
        &self,
        plan: &Plan,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> WorkflowResult<Value> {
        let (capability_id, args) = plan
            .steps
            .first()
            .map(|s| (s.capability_id.clone(), s.args.clone()))
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                workflow_id: workflow_id.to_string(),
                capability_id: capability_id.clone(),
                args,
            });

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(WorkflowError::Executor("cancelled".into()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.next_outcome(&capability_id) {
            Scripted::Ok(value) => Ok(value),
            Scripted::Fail(message) => Err(WorkflowError::Executor(message)),
        }
    }
}

/// Principles gate with scripted behaviour: allow everything, block plans
/// that reference specific capability ids, or simulate an outage.
pub struct ScriptedPrinciples {
    blocked_capabilities: HashSet<String>,
    unavailable: bool,
}

impl ScriptedPrinciples {
    /// Admit every plan.
    pub fn allow_all() -> Self {
        Self {
            blocked_capabilities: HashSet::new(),
            unavailable: false,
        }
    }

    /// Block any plan whose steps reference one of these capability ids.
    pub fn blocking<'a>(capability_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            blocked_capabilities: capability_ids.into_iter().map(String::from).collect(),
            unavailable: false,
        }
    }

    /// Fail every check as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            blocked_capabilities: HashSet::new(),
            unavailable: true,
        }
    }

    fn references_blocked(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => map.iter().any(|(key, child)| {
                (key == "capability_id"
                    && child
                        .as_str()
                        .is_some_and(|id| self.blocked_capabilities.contains(id)))
                    || self.references_blocked(child)
            }),
            Value::Array(items) => items.iter().any(|child| self.references_blocked(child)),
            _ => false,
        }
    }
}

#[async_trait]
impl PrinciplesGate for ScriptedPrinciples {
    async fn check_plan(&self, plan: &Value) -> WorkflowResult<PrinciplesVerdict> {
        if self.unavailable {
            return Err(WorkflowError::PrinciplesUnavailable(
                "scripted outage".into(),
            ));
        }
        if self.references_blocked(plan) {
            return Ok(PrinciplesVerdict::blocked("references a blocked capability"));
        }
        Ok(PrinciplesVerdict::admitted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_kernel::capability::Goal;

    fn one_step_plan(capability_id: &str) -> Plan {
        Plan::single_step(Goal::new("g"), capability_id, Default::default(), 1.0, 0.9)
    }

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let executor = MockExecutor::builder()
            .fail_times_then_ok("cap", 2, json!("finally"))
            .build();
        let cancel = CancellationToken::new();
        let plan = one_step_plan("cap");

        assert!(executor.execute_plan(&plan, "w", &cancel).await.is_err());
        assert!(executor.execute_plan(&plan, "w", &cancel).await.is_err());
        assert_eq!(
            executor.execute_plan(&plan, "w", &cancel).await.unwrap(),
            json!("finally")
        );
        // Script exhausted: back to the default.
        assert_eq!(
            executor.execute_plan(&plan, "w", &cancel).await.unwrap(),
            json!({"status": "ok"})
        );
        assert_eq!(executor.call_count(), 4);
    }

    #[tokio::test]
    async fn delayed_executor_observes_cancellation() {
        let executor = MockExecutor::builder()
            .delay(Duration::from_secs(30))
            .build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = executor
            .execute_plan(&one_step_plan("cap"), "w", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Executor(_)));
    }

    #[tokio::test]
    async fn blocking_gate_matches_nested_capability_ids() {
        let gate = ScriptedPrinciples::blocking(["bad"]);
        let flat = serde_json::to_value(one_step_plan("bad")).unwrap();
        assert!(gate.check_plan(&flat).await.unwrap().blocked);

        let nested = json!({"steps": [{"children": [{"capability_id": "bad"}]}]});
        assert!(gate.check_plan(&nested).await.unwrap().blocked);

        let clean = serde_json::to_value(one_step_plan("good")).unwrap();
        assert!(!gate.check_plan(&clean).await.unwrap().blocked);
    }
}
