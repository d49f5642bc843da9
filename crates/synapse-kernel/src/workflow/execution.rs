//! Live workflow execution state.

use super::context::ExecutionContext;
use super::plan::HierarchicalPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Aggregate step counters for one execution.
///
/// `completed` counts resolved slots — successfully completed steps and
/// skipped conditions both count, so a finished workflow always reads
/// `completed == total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub percentage: f64,
}

impl Progress {
    /// Zeroed progress over `total` steps.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Recompute `percentage` from the counters.
    pub fn recalculate(&mut self) {
        self.percentage = if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        };
    }
}

/// One live workflow, exclusively owned by the orchestrator while active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Execution identifier (also the id on the wire and in the store).
    pub id: String,

    /// The plan being driven. Step lifecycle fields mutate; the shape
    /// does not.
    pub plan: HierarchicalPlan,

    /// Mutable state, variables, and step results.
    pub context: ExecutionContext,

    /// Workflow-level status.
    pub status: ExecutionStatus,

    /// The request text that started this workflow.
    #[serde(default)]
    pub user_request: String,

    /// When the execution was registered.
    pub started_at: DateTime<Utc>,

    /// Wall-clock time of the last observable change.
    pub last_activity: DateTime<Utc>,

    /// Aggregate counters.
    pub progress: Progress,

    /// Terminal error, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Why the workflow is paused. Present iff status is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,

    /// Token required to resume. Present iff status is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

impl WorkflowExecution {
    /// Register a new running execution for `plan`.
    pub fn new(plan: HierarchicalPlan, user_request: impl Into<String>) -> Self {
        let now = Utc::now();
        let total = plan.steps.len();
        let context = ExecutionContext::new(plan.id.clone());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan,
            context,
            status: ExecutionStatus::Running,
            user_request: user_request.into(),
            started_at: now,
            last_activity: now,
            progress: Progress::new(total),
            error: None,
            pause_reason: None,
            resume_token: None,
        }
    }

    /// Bump `last_activity`.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
