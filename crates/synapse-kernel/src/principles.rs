//! Principles (policy) seam.
//!
//! The planner asks an external policy oracle whether a candidate plan is
//! admissible. The kernel only fixes the narrow verdict contract; the
//! HTTP client lives in `synapse-foundation`, and tests substitute
//! scripted gates.

use crate::error::WorkflowResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Admissibility verdict for one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinciplesVerdict {
    /// `true` when the plan must not run.
    pub blocked: bool,

    /// Human-readable explanation, empty when unblocked.
    #[serde(default)]
    pub reason: String,
}

impl PrinciplesVerdict {
    /// An unblocked verdict with no reason.
    pub fn admitted() -> Self {
        Self {
            blocked: false,
            reason: String::new(),
        }
    }

    /// A blocked verdict with the given reason.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            reason: reason.into(),
        }
    }
}

/// Policy oracle answering plan-admissibility queries.
///
/// The payload is the serialized plan body (flat or hierarchical); the
/// gate does not interpret it beyond forwarding.
#[async_trait]
pub trait PrinciplesGate: Send + Sync {
    /// Check one plan. Transport failures and non-2xx responses surface as
    /// [`WorkflowError::PrinciplesUnavailable`](crate::error::WorkflowError).
    async fn check_plan(&self, plan: &Value) -> WorkflowResult<PrinciplesVerdict>;
}
