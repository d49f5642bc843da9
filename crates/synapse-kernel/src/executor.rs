//! Capability executor seam.
//!
//! The orchestrator never runs capability code itself — it hands a flat
//! plan to an injected executor and treats the call as
//! blocking-with-cancellation. Implementations may be synchronous or
//! asynchronous underneath; they should observe the cancellation token at
//! their own suspension points.

use crate::error::WorkflowResult;
use crate::plan::Plan;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Runs a flat plan of one or more capability invocations.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    /// Execute `plan` on behalf of `workflow_id` and return its result.
    ///
    /// Cancellation is best-effort: the orchestrator cancels `cancel` when
    /// the owning workflow is cancelled, and does not forcibly interrupt
    /// an executor that ignores it.
    async fn execute_plan(
        &self,
        plan: &Plan,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> WorkflowResult<Value>;
}
