//! Synapse Kernel — data model and trait contracts for goal planning and
//! workflow orchestration.
//!
//! This crate defines the value types and seam traits shared by the planner
//! and orchestrator layers. Per Synapse's microkernel rules:
//!
//! - **Data model and trait definitions** live here in `synapse-kernel`.
//! - **Concrete implementations** (registries, planners, store backends,
//!   the HTTP principles client) live in `synapse-foundation`.
//! - **The execution engine** lives in `synapse-runtime`.
//! - The kernel must never depend on the layers above it.

// error module
pub mod error;

// capability + goal records
pub mod capability;

// flat plan model
pub mod plan;

// hierarchical workflow model
pub mod workflow;

// per-workflow event model
pub mod event;

// key-value store contract
pub mod store;

// capability executor seam
pub mod executor;

// principles (policy) seam
pub mod principles;

pub use capability::{Capability, Goal};
pub use error::{KvResult, StoreError, WorkflowError, WorkflowResult};
pub use event::{WorkflowEvent, WorkflowEventKind, EVENT_CHANNEL_CAPACITY};
pub use executor::CapabilityExecutor;
pub use plan::{Episode, Plan, PlanStep};
pub use principles::{PrinciplesGate, PrinciplesVerdict};
pub use store::KvStore;
pub use workflow::{
    ExecutionContext, ExecutionStatus, HierarchicalPlan, LoopConfig, Progress, StepStatus,
    StepType, WorkflowExecution, WorkflowStep, WorkflowTemplate,
};
