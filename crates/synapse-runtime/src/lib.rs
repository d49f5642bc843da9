//! Synapse Runtime — the asynchronous workflow orchestrator.
//!
//! Drives [`HierarchicalPlan`](synapse_kernel::workflow::HierarchicalPlan)s
//! to a terminal status: one background worker per workflow, a
//! single-threaded cooperative execution loop inside each worker,
//! pause/resume/cancel control operations, bounded per-workflow event
//! channels, store-persisted retry budgets and terminal records, and
//! store-held aggregate metrics.

pub mod config;
pub mod orchestrator;

pub use config::OrchestratorConfig;
pub use orchestrator::record::{ArtifactDescriptor, WorkflowRecord};
pub use orchestrator::{WorkflowDetails, WorkflowOrchestrator, WorkflowStatus};
