//! Hierarchical plan — a DAG of typed steps plus its execution order.

use super::step::WorkflowStep;
use crate::capability::Goal;
use crate::error::{WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A DAG of typed steps with a precomputed topological execution order.
///
/// Immutable once execution starts, except for the steps' mutable
/// lifecycle fields, which only the orchestrator touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalPlan {
    /// Plan identifier.
    pub id: String,

    /// The goal this plan decomposes.
    pub goal: Goal,

    /// Steps in insertion order. Insertion order is the tie-break for
    /// simultaneously-ready steps.
    pub steps: Vec<WorkflowStep>,

    /// Topological extension of the dependency graph.
    #[serde(default)]
    pub execution_order: Vec<String>,

    /// Template this plan was instantiated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl HierarchicalPlan {
    /// Create an empty plan for a goal with a fresh id.
    pub fn new(goal: Goal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal,
            steps: Vec::new(),
            execution_order: Vec::new(),
            template_id: None,
        }
    }

    /// Append a step (builder pattern).
    pub fn add_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Mutable step lookup.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Check structural soundness: unique step ids and no dangling
    /// dependency references. Cycles are deliberately not rejected here —
    /// they surface as a runtime deadlock with a diagnostic naming the
    /// starved steps.
    pub fn validate(&self) -> WorkflowResult<()> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        if ids.len() != self.steps.len() {
            return Err(WorkflowError::InvalidPlan(
                "plan contains duplicate step ids".into(),
            ));
        }
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(WorkflowError::InvalidPlan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Produce a topological extension of the dependency graph.
    ///
    /// Kahn's algorithm with one deviation from the textbook version:
    /// among simultaneously-ready steps, the earliest-inserted wins, so
    /// the order is deterministic and mirrors authoring order. Steps left
    /// unreachable by a dependency cycle are appended in insertion order;
    /// the runtime's deadlock detection reports them.
    pub fn compute_execution_order(&self) -> Vec<String> {
        let positions: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut remaining_deps: Vec<HashSet<usize>> = self
            .steps
            .iter()
            .map(|s| {
                s.dependencies
                    .iter()
                    .filter_map(|d| positions.get(d.as_str()).copied())
                    .collect()
            })
            .collect();

        let mut ordered: Vec<usize> = Vec::with_capacity(self.steps.len());
        let mut placed = vec![false; self.steps.len()];

        loop {
            // First unplaced step with no outstanding dependencies.
            let next = (0..self.steps.len())
                .find(|&i| !placed[i] && remaining_deps[i].is_empty());
            let Some(i) = next else { break };
            placed[i] = true;
            ordered.push(i);
            for deps in remaining_deps.iter_mut() {
                deps.remove(&i);
            }
        }

        // Cyclic leftovers, in insertion order.
        for i in 0..self.steps.len() {
            if !placed[i] {
                ordered.push(i);
            }
        }

        ordered
            .into_iter()
            .map(|i| self.steps[i].id.clone())
            .collect()
    }

    /// Fill `execution_order` from the dependency graph (builder pattern).
    pub fn finalize(mut self) -> Self {
        self.execution_order = self.compute_execution_order();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(id: &str) -> WorkflowStep {
        WorkflowStep::capability(id, format!("cap_{id}"))
    }

    #[test]
    fn execution_order_keeps_insertion_order_for_ready_steps() {
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("b"))
            .add_step(cap("a"))
            .finalize();
        assert_eq!(plan.execution_order, vec!["b", "a"]);
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("c").depends_on("a").depends_on("b"))
            .add_step(cap("a"))
            .add_step(cap("b"))
            .finalize();
        assert_eq!(plan.execution_order, vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_orders_by_insertion_among_ready() {
        // a -> {c, b} -> d, with c inserted before b.
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("a"))
            .add_step(cap("c").depends_on("a"))
            .add_step(cap("b").depends_on("a"))
            .add_step(cap("d").depends_on("b").depends_on("c"))
            .finalize();
        assert_eq!(plan.execution_order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn cyclic_steps_are_appended_not_dropped() {
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("x").depends_on("y"))
            .add_step(cap("y").depends_on("x"))
            .add_step(cap("z"))
            .finalize();
        assert_eq!(plan.execution_order, vec!["z", "x", "y"]);
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("a"))
            .add_step(cap("a"));
        assert!(matches!(
            plan.validate(),
            Err(WorkflowError::InvalidPlan(_))
        ));
    }

    #[test]
    fn validate_rejects_dangling_dependencies() {
        let plan = HierarchicalPlan::new(Goal::new("g")).add_step(cap("a").depends_on("ghost"));
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn validate_accepts_cycles() {
        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(cap("x").depends_on("y"))
            .add_step(cap("y").depends_on("x"));
        assert!(plan.validate().is_ok());
    }
}
