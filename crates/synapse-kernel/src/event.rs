//! Per-workflow event model.
//!
//! Each active workflow owns one bounded FIFO channel of capacity
//! [`EVENT_CHANNEL_CAPACITY`]. Enqueue is non-blocking: when the channel
//! is full the event is dropped (best-effort log), and the channel is
//! closed when the execution worker returns. Subscribers must tolerate
//! close; no acknowledgements exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounded capacity of every per-workflow event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// What happened, as seen on a workflow's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCancelled,
    WorkflowCompleted,
    WorkflowFailed,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetry,
}

impl WorkflowEventKind {
    /// Returns `true` for the three events that may end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCancelled
        )
    }
}

/// One event on a workflow's channel. Timestamps are monotonic within a
/// channel because events are stamped and enqueued by a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Event discriminator.
    #[serde(rename = "type")]
    pub kind: WorkflowEventKind,

    /// Owning workflow.
    pub workflow_id: String,

    /// Step the event concerns, absent for workflow-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    /// Kind-specific payload (retry counts, error text, progress).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl WorkflowEvent {
    /// Workflow-level event stamped now.
    pub fn new(kind: WorkflowEventKind, workflow_id: impl Into<String>) -> Self {
        Self {
            kind,
            workflow_id: workflow_id.into(),
            step_id: None,
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    /// Step-level event stamped now.
    pub fn for_step(
        kind: WorkflowEventKind,
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..Self::new(kind, workflow_id)
        }
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_snake_case() {
        let event = WorkflowEvent::for_step(WorkflowEventKind::StepRetry, "w1", "s1")
            .with_data(json!({"retry_count": 1}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step_retry");
        assert_eq!(value["step_id"], "s1");
        assert_eq!(value["data"]["retry_count"], 1);
    }

    #[test]
    fn terminal_kinds_are_exactly_three() {
        use WorkflowEventKind::*;
        for kind in [WorkflowCompleted, WorkflowFailed, WorkflowCancelled] {
            assert!(kind.is_terminal());
        }
        for kind in [WorkflowStarted, StepStarted, StepCompleted, StepFailed, StepRetry] {
            assert!(!kind.is_terminal());
        }
    }
}
