//! Hierarchical workflow model.
//!
//! A workflow is a DAG of typed steps (`capability`, `subgoal`,
//! `condition`, `loop`) with a precomputed topological execution order.
//! The kernel fixes the value types and the ordering algorithm; the
//! hierarchical planner builds plans and the runtime drives them.

pub mod context;
pub mod execution;
pub mod plan;
pub mod step;
pub mod template;

// Re-export public API
pub use context::ExecutionContext;
pub use execution::{ExecutionStatus, Progress, WorkflowExecution};
pub use plan::HierarchicalPlan;
pub use step::{LoopConfig, StepStatus, StepType, WorkflowStep};
pub use template::WorkflowTemplate;
