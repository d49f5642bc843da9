//! Shared harness for the orchestrator integration tests.
//!
//! Builds a full stack over the in-memory store — registry, hierarchical
//! planner with an allow-all principles gate, scripted mock executor —
//! with deadlines shortened so tests observe pause polls and linger
//! windows without multi-second sleeps.

use std::sync::Arc;
use std::time::Duration;
use synapse_foundation::{CapabilityRegistry, HierarchicalPlanner, MemoryKvStore};
use synapse_kernel::capability::Goal;
use synapse_kernel::event::{WorkflowEvent, WorkflowEventKind};
use synapse_kernel::workflow::{HierarchicalPlan, WorkflowStep};
use synapse_runtime::{OrchestratorConfig, WorkflowOrchestrator, WorkflowStatus};
use synapse_testing::{MockExecutor, ScriptedPrinciples};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub store: Arc<MemoryKvStore>,
    pub executor: Arc<MockExecutor>,
    pub registry: Arc<CapabilityRegistry>,
}

/// Config tuned for tests: tight polls, a short linger window.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        pause_poll_interval: Duration::from_millis(10),
        completed_linger: Duration::from_millis(200),
        list_deadline: Duration::from_secs(1),
        default_step_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    }
}

pub fn harness(executor: MockExecutor) -> Harness {
    harness_with_config(executor, test_config())
}

/// Route orchestrator logs through the test harness when `RUST_LOG` asks
/// for them. Safe to call from every test; only the first call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with_config(executor: MockExecutor, config: OrchestratorConfig) -> Harness {
    init_tracing();
    let store = MemoryKvStore::shared();
    let registry = Arc::new(CapabilityRegistry::new(store.clone()));
    let planner = Arc::new(HierarchicalPlanner::new(
        registry.clone(),
        Arc::new(ScriptedPrinciples::allow_all()),
        store.clone(),
    ));
    let executor = Arc::new(executor);
    let orchestrator =
        WorkflowOrchestrator::with_config(store.clone(), executor.clone(), planner, config);
    Harness {
        orchestrator,
        store,
        executor,
        registry,
    }
}

/// A capability step invoking `capability_id`.
pub fn cap_step(id: &str, capability_id: &str) -> WorkflowStep {
    WorkflowStep::capability(id, capability_id).with_confidence(0.9)
}

/// A finalized plan over the given steps.
pub fn plan_of(goal_type: &str, steps: Vec<WorkflowStep>) -> HierarchicalPlan {
    let mut plan = HierarchicalPlan::new(Goal::new(goal_type));
    plan.steps = steps;
    plan.finalize()
}

/// Drain a workflow's event stream until its terminal event (or the
/// channel closes, or five seconds pass).
pub async fn drain_events(mut stream: ReceiverStream<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(event)) => {
                let terminal = event.kind.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    events
}

/// Kinds of the drained events, for order assertions.
pub fn kinds(events: &[WorkflowEvent]) -> Vec<WorkflowEventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Index of the first event matching kind and (optionally) step id.
pub fn index_of(
    events: &[WorkflowEvent],
    kind: WorkflowEventKind,
    step_id: Option<&str>,
) -> usize {
    events
        .iter()
        .position(|e| e.kind == kind && e.step_id.as_deref() == step_id)
        .unwrap_or_else(|| panic!("no {kind:?} event for step {step_id:?}"))
}

/// Poll `status` until the workflow completes, up to five seconds.
pub async fn wait_completed(orchestrator: &WorkflowOrchestrator, workflow_id: &str) -> WorkflowStatus {
    for _ in 0..200 {
        if let Ok(status) = orchestrator.status(workflow_id).await {
            if status.status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("workflow {workflow_id} did not reach a terminal status");
}
