//! Error taxonomy shared across the planning and orchestration crates.

use thiserror::Error;

/// Result type for workflow-level operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Result type for key-value store operations.
pub type KvResult<T> = Result<T, StoreError>;

/// Failure raised by a [`KvStore`](crate::store::KvStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the connection dropped mid-call.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A value could not be serialized for or deserialized from the backend.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// The operation does not apply to the value stored under the key
    /// (e.g. `INCR` on a set).
    #[error("wrong value type for key '{0}'")]
    WrongType(String),

    /// Any other backend failure.
    #[error("store error: {0}")]
    Other(String),
}

/// Unified error kinds surfaced by the planner and orchestrator APIs.
///
/// User-facing calls return these verbatim; the execution loop converts
/// step-level errors into retries or workflow failure instead of
/// propagating partial successes.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Unknown id (workflow, capability, or template).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the current status.
    #[error("operation '{operation}' not allowed in status '{status}'")]
    IllegalState { operation: String, status: String },

    /// Resume token mismatch.
    #[error("resume token mismatch")]
    BadToken,

    /// Capability matching returned nothing for the goal.
    #[error("no capabilities match goal '{0}'")]
    NoCandidates(String),

    /// Every candidate plan was blocked by the principles service.
    #[error("all candidate plans were blocked by principles")]
    NoAdmissiblePlan,

    /// Transport failure or non-2xx from the principles service.
    #[error("principles service unavailable: {0}")]
    PrinciplesUnavailable(String),

    /// Key-value store IO failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A persisted record could not be decoded. Recoverable where records
    /// are listed, fatal where a record is addressed by id.
    #[error("malformed record: {0}")]
    Decode(String),

    /// The capability executor reported a failure for a step.
    #[error("executor failed: {0}")]
    Executor(String),

    /// A per-step or per-request deadline elapsed.
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A full scheduling pass processed no step while work was pending.
    #[error("workflow deadlock: {0}")]
    Deadlock(String),

    /// The plan itself is malformed (duplicate ids, dangling dependencies,
    /// empty step list).
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

impl WorkflowError {
    /// Build an [`IllegalState`](Self::IllegalState) error from an operation
    /// name and the status that rejected it.
    pub fn illegal_state(operation: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::IllegalState {
            operation: operation.into(),
            status: status.to_string(),
        }
    }

    /// Returns `true` if retrying the same call could succeed (transient
    /// transport or executor failures).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PrinciplesUnavailable(_)
                | Self::Store(_)
                | Self::Executor(_)
                | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_message_names_the_kind() {
        let err = WorkflowError::Deadlock("steps [x] starved".into());
        assert!(err.to_string().contains("deadlock"));
    }

    #[test]
    fn store_errors_convert_transparently() {
        let err: WorkflowError = StoreError::Connection("refused".into()).into();
        assert!(matches!(err, WorkflowError::Store(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn illegal_state_reports_operation_and_status() {
        let err = WorkflowError::illegal_state("resume", "running");
        assert_eq!(
            err.to_string(),
            "operation 'resume' not allowed in status 'running'"
        );
    }
}
