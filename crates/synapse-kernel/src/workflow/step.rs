//! Workflow step — a node in the plan DAG with a status lifecycle.

use crate::capability::Goal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Step discriminator. Dispatch is a single `match` in the runtime; there
/// is no runtime inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Invoke a capability through the executor.
    Capability,
    /// Expand a nested goal at run time and execute it in place.
    Subgoal,
    /// Evaluate a predicate over the execution context's state flags.
    Condition,
    /// Execute a templated child step repeatedly while a guard holds.
    Loop,
}

/// Status lifecycle of a step during execution.
///
/// Transitions are monotonic except retry: `failed → pending` is allowed
/// while the retry budget lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies or a free pass.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed after exhausting its retry budget.
    Failed,
    /// Resolved without running (false condition).
    Skipped,
}

impl StepStatus {
    /// Returns `true` once the step can no longer run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Returns `true` when the step resolved its slot without failing.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Configuration of a `loop` step. The loop body is the step's first
/// child, deep-copied per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Name substituted for `${<variable>}` in the body's args; bound to
    /// the zero-based iteration index.
    pub variable: String,

    /// Hard iteration cap. Zero iterations is a valid, empty loop.
    pub max_iterations: u32,

    /// Guard predicate over the context's state flags, re-evaluated before
    /// each iteration. Empty means vacuously true.
    #[serde(default)]
    pub condition: String,
}

fn default_critical() -> bool {
    true
}

/// A node in a workflow plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the owning plan.
    pub id: String,

    /// Variant discriminator.
    pub step_type: StepType,

    /// Capability to invoke (`capability` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,

    /// Nested goal (`subgoal` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_goal: Option<Goal>,

    /// Predicate over state flags (`condition` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Loop guard and iteration cap (`loop` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,

    /// Named arguments, after variable substitution.
    #[serde(default)]
    pub args: HashMap<String, Value>,

    /// State flags expected before execution. Carried metadata; readiness
    /// is gated on `dependencies`.
    #[serde(default)]
    pub preconditions: Vec<String>,

    /// State flags set to `true` when the step completes.
    #[serde(default)]
    pub postconditions: Vec<String>,

    /// Estimated execution cost.
    #[serde(default)]
    pub estimated_cost: f64,

    /// Confidence the step will succeed, in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,

    /// Per-step timeout in seconds. Zero means: default for capability
    /// steps, sum of child timeouts for composite steps.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Retry budget after the first failure.
    #[serde(default)]
    pub max_retries: u32,

    /// Current lifecycle status. Mutated only by the orchestrator.
    #[serde(default)]
    pub status: StepStatus,

    /// Ids of steps that must resolve before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Child steps (the loop body template).
    #[serde(default)]
    pub children: Vec<WorkflowStep>,

    /// Reserved metadata; the in-workflow loop stays single-threaded
    /// cooperative whether or not this is set.
    #[serde(default)]
    pub parallel: bool,

    /// Whether failure (after retries) aborts the enclosing workflow.
    /// Template instantiation clears this.
    #[serde(default = "default_critical")]
    pub critical: bool,

    /// Set when the step transitions to running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set when the step reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// The step's result, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Last error message, kept across retries until success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowStep {
    fn base(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            capability_id: None,
            sub_goal: None,
            condition: None,
            loop_config: None,
            args: HashMap::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            estimated_cost: 0.0,
            confidence: 0.0,
            timeout_secs: 0,
            max_retries: 0,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            children: Vec::new(),
            parallel: false,
            critical: true,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// A step that invokes a capability.
    pub fn capability(id: impl Into<String>, capability_id: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepType::Capability);
        step.capability_id = Some(capability_id.into());
        step
    }

    /// A step that expands and runs a nested goal in place.
    pub fn subgoal(id: impl Into<String>, goal: Goal) -> Self {
        let mut step = Self::base(id, StepType::Subgoal);
        step.sub_goal = Some(goal);
        step
    }

    /// A step that evaluates a predicate over the context's state flags.
    pub fn condition(id: impl Into<String>, predicate: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepType::Condition);
        step.condition = Some(predicate.into());
        step
    }

    /// A step that repeats `body` under `config`.
    pub fn repeat(id: impl Into<String>, config: LoopConfig, body: WorkflowStep) -> Self {
        let mut step = Self::base(id, StepType::Loop);
        step.loop_config = Some(config);
        step.children.push(body);
        step
    }

    /// Attach a named argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Replace the whole argument map.
    pub fn with_args(mut self, args: HashMap<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Require another step to resolve first.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    /// Add a state flag set on completion.
    pub fn with_postcondition(mut self, flag: impl Into<String>) -> Self {
        self.postconditions.push(flag.into());
        self
    }

    /// Set the per-step timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the confidence estimate.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the cost estimate.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Mark the step as non-critical: its terminal failure no longer
    /// aborts the workflow mid-run.
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Returns `true` when every dependency id is in `resolved`.
    pub fn dependencies_met(&self, resolved: &HashMap<String, Value>) -> bool {
        self.dependencies.iter().all(|dep| resolved.contains_key(dep))
    }

    /// Reset the mutable execution fields, keeping the definition.
    pub fn reset_execution_state(&mut self) {
        self.status = StepStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
        self.error = None;
        for child in &mut self.children {
            child.reset_execution_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn critical_defaults_to_true_in_deserialization() {
        let step: WorkflowStep =
            serde_json::from_str(r#"{"id": "s1", "step_type": "capability"}"#).unwrap();
        assert!(step.critical);
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn step_type_serializes_snake_case() {
        let step = WorkflowStep::condition("check", "ready");
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["step_type"], "condition");
        assert_eq!(value["condition"], "ready");
    }

    #[test]
    fn dependencies_met_requires_every_dependency() {
        let step = WorkflowStep::capability("c", "cap").depends_on("a").depends_on("b");
        let mut resolved = HashMap::new();
        resolved.insert("a".to_string(), json!(1));
        assert!(!step.dependencies_met(&resolved));
        resolved.insert("b".to_string(), json!(2));
        assert!(step.dependencies_met(&resolved));
    }

    #[test]
    fn reset_clears_execution_state_recursively() {
        let mut body = WorkflowStep::capability("body", "cap");
        body.status = StepStatus::Completed;
        body.result = Some(json!("out"));
        let mut step = WorkflowStep::repeat(
            "l",
            LoopConfig {
                variable: "i".into(),
                max_iterations: 2,
                condition: String::new(),
            },
            body,
        );
        step.status = StepStatus::Failed;
        step.error = Some("boom".into());

        step.reset_execution_state();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.error.is_none());
        assert_eq!(step.children[0].status, StepStatus::Pending);
        assert!(step.children[0].result.is_none());
    }

    #[test]
    fn resolved_statuses() {
        assert!(StepStatus::Completed.is_resolved());
        assert!(StepStatus::Skipped.is_resolved());
        assert!(!StepStatus::Failed.is_resolved());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }
}
