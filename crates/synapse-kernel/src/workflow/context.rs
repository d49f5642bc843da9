//! Per-workflow mutable execution context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Mutable bag of state flags, variables, and step results owned by one
/// workflow execution. `step_results[id]` is set exactly when step `id`
/// completed or was skipped — dependency readiness is gated on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The plan this context belongs to.
    pub plan_id: String,

    /// Boolean state flags, written by postconditions and read by
    /// condition and loop predicates.
    #[serde(default)]
    pub state: HashMap<String, bool>,

    /// Free-form variables (template parameters, caller-supplied inputs).
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Results keyed by step id.
    #[serde(default)]
    pub step_results: HashMap<String, Value>,

    /// When the execution began.
    pub started_at: DateTime<Utc>,

    /// Wall-clock time of the last mutation, for UI consumption.
    pub last_updated: DateTime<Utc>,
}

impl ExecutionContext {
    /// Fresh context for a plan.
    pub fn new(plan_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.into(),
            state: HashMap::new(),
            variables: HashMap::new(),
            step_results: HashMap::new(),
            started_at: now,
            last_updated: now,
        }
    }

    /// Child context for an inline sub-plan: inherits state flags and
    /// variables, starts with no results.
    pub fn child_for(&self, plan_id: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            variables: self.variables.clone(),
            ..Self::new(plan_id)
        }
    }

    /// Record a step's result.
    pub fn record_result(&mut self, step_id: impl Into<String>, result: Value) {
        self.step_results.insert(step_id.into(), result);
        self.touch();
    }

    /// Set every listed flag to `true`.
    pub fn apply_postconditions(&mut self, flags: &[String]) {
        for flag in flags {
            self.state.insert(flag.clone(), true);
        }
        if !flags.is_empty() {
            self.touch();
        }
    }

    /// Read a state flag, absent meaning `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.state.get(name).copied().unwrap_or(false)
    }

    /// Set one state flag.
    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.state.insert(name.into(), value);
        self.touch();
    }

    /// Bump `last_updated`.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn postconditions_set_flags_true() {
        let mut ctx = ExecutionContext::new("p1");
        ctx.apply_postconditions(&["done".to_string(), "ready".to_string()]);
        assert!(ctx.flag("done"));
        assert!(ctx.flag("ready"));
        assert!(!ctx.flag("absent"));
    }

    #[test]
    fn child_inherits_state_not_results() {
        let mut parent = ExecutionContext::new("p1");
        parent.set_flag("seen", true);
        parent.record_result("s1", json!(42));

        let child = parent.child_for("p2");
        assert!(child.flag("seen"));
        assert!(child.step_results.is_empty());
        assert_eq!(child.plan_id, "p2");
    }
}
