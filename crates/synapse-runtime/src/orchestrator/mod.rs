//! Workflow orchestrator — public control surface.
//!
//! Process-wide state is exactly two paired maps (active executions and
//! their event channels, plus the cancellation tokens that belong to
//! them) behind one read/write lock. Execution fields are mutated by the
//! owning worker; `status` may additionally be written by
//! pause/resume/cancel under the write side of each execution's own lock.

pub mod metrics;
pub mod record;
pub mod retry;
mod worker;

use crate::config::OrchestratorConfig;
use chrono::{DateTime, Utc};
use record::WorkflowRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use synapse_foundation::HierarchicalPlanner;
use synapse_kernel::capability::Goal;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::event::{WorkflowEvent, WorkflowEventKind};
use synapse_kernel::executor::CapabilityExecutor;
use synapse_kernel::store::{keys, KvStore};
use synapse_kernel::workflow::{
    ExecutionStatus, HierarchicalPlan, Progress, WorkflowExecution, WorkflowStep,
};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time snapshot of one workflow, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub id: String,
    pub status: ExecutionStatus,
    pub task_name: String,
    pub description: String,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

impl WorkflowStatus {
    fn from_execution(exec: &WorkflowExecution) -> Self {
        Self {
            id: exec.id.clone(),
            status: exec.status,
            task_name: exec.plan.goal.goal_type.clone(),
            description: exec.user_request.clone(),
            progress: exec.progress.clone(),
            started_at: exec.started_at,
            last_activity: exec.last_activity,
            error: exec.error.clone(),
            pause_reason: exec.pause_reason.clone(),
            resume_token: exec.resume_token.clone(),
        }
    }

    fn from_record(record: WorkflowRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            task_name: record.task_name,
            description: record.description,
            progress: record.progress,
            started_at: record.started_at,
            last_activity: record.completed_at,
            error: None,
            pause_reason: None,
            resume_token: None,
        }
    }

    /// Placeholder for an id listed in `active_workflows` that this
    /// process holds no state for (another instance owns it).
    fn placeholder(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: ExecutionStatus::Running,
            task_name: String::new(),
            description: String::new(),
            progress: Progress::default(),
            started_at: now,
            last_activity: now,
            error: None,
            pause_reason: None,
            resume_token: None,
        }
    }
}

/// Deep snapshot of one workflow including its steps, safe to hand to
/// callers — no internal pointer aliasing escapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDetails {
    pub id: String,
    pub status: ExecutionStatus,
    pub goal: Goal,
    pub progress: Progress,
    pub execution_order: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
}

pub(crate) struct EventChannel {
    pub(crate) sender: mpsc::Sender<WorkflowEvent>,
    pub(crate) receiver: Option<mpsc::Receiver<WorkflowEvent>>,
}

#[derive(Default)]
pub(crate) struct OrchestratorState {
    pub(crate) executions: HashMap<String, Arc<RwLock<WorkflowExecution>>>,
    pub(crate) channels: HashMap<String, EventChannel>,
    pub(crate) cancellations: HashMap<String, CancellationToken>,
}

pub(crate) struct Shared {
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) executor: Arc<dyn CapabilityExecutor>,
    pub(crate) planner: Arc<HierarchicalPlanner>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) state: RwLock<OrchestratorState>,
}

/// Drives hierarchical plans to a terminal status, one background worker
/// per workflow.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    shared: Arc<Shared>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn KvStore>,
        executor: Arc<dyn CapabilityExecutor>,
        planner: Arc<HierarchicalPlanner>,
    ) -> Self {
        Self::with_config(store, executor, planner, OrchestratorConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn KvStore>,
        executor: Arc<dyn CapabilityExecutor>,
        planner: Arc<HierarchicalPlanner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                planner,
                config,
                state: RwLock::new(OrchestratorState::default()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register and launch a workflow. Non-blocking: the returned
    /// execution is a snapshot taken at registration.
    pub async fn start_workflow(
        &self,
        plan: HierarchicalPlan,
        user_request: impl Into<String>,
    ) -> WorkflowResult<WorkflowExecution> {
        if plan.steps.is_empty() {
            return Err(WorkflowError::illegal_state(
                "start_workflow",
                "plan with zero steps",
            ));
        }
        plan.validate()?;

        let mut plan = plan;
        if plan.execution_order.len() != plan.steps.len() {
            plan.execution_order = plan.compute_execution_order();
        }

        let exec = WorkflowExecution::new(plan, user_request);
        let workflow_id = exec.id.clone();
        let exec_arc = Arc::new(RwLock::new(exec.clone()));
        let (sender, receiver) = mpsc::channel(self.shared.config.event_capacity);
        let cancel = CancellationToken::new();

        {
            let mut state = self.shared.state.write().await;
            state
                .executions
                .insert(workflow_id.clone(), exec_arc.clone());
            state.channels.insert(
                workflow_id.clone(),
                EventChannel {
                    sender: sender.clone(),
                    receiver: Some(receiver),
                },
            );
            state.cancellations.insert(workflow_id.clone(), cancel.clone());
        }

        // Store registration is eventually consistent; readers merge.
        if let Err(err) = self
            .shared
            .store
            .sadd(keys::ACTIVE_WORKFLOWS, &workflow_id)
            .await
        {
            warn!(%err, %workflow_id, "failed to register workflow in active set");
        } else if let Err(err) = self
            .shared
            .store
            .expire(keys::ACTIVE_WORKFLOWS, self.shared.config.active_set_ttl)
            .await
        {
            warn!(%err, "failed to refresh active set ttl");
        }

        emit(
            &sender,
            WorkflowEvent::new(WorkflowEventKind::WorkflowStarted, &workflow_id).with_data(
                json!({
                    "task": exec.plan.goal.goal_type.clone(),
                    "total_steps": exec.progress.total,
                }),
            ),
        );
        info!(%workflow_id, task = %exec.plan.goal.goal_type, steps = exec.progress.total, "workflow started");

        let shared = self.shared.clone();
        tokio::spawn(worker::run(shared, exec_arc, cancel, sender));

        Ok(exec)
    }

    /// Pause a running workflow. Returns the resume token.
    pub async fn pause(
        &self,
        workflow_id: &str,
        reason: impl Into<String>,
    ) -> WorkflowResult<String> {
        let (exec_arc, sender) = self.entry(workflow_id).await?;
        let reason = reason.into();
        let token = uuid::Uuid::new_v4().to_string();
        {
            let mut exec = exec_arc.write().await;
            if exec.status != ExecutionStatus::Running {
                return Err(WorkflowError::illegal_state("pause", exec.status));
            }
            exec.status = ExecutionStatus::Paused;
            exec.pause_reason = Some(reason.clone());
            exec.resume_token = Some(token.clone());
            exec.touch();
        }
        if let Some(sender) = &sender {
            emit(
                sender,
                WorkflowEvent::new(WorkflowEventKind::WorkflowPaused, workflow_id)
                    .with_data(json!({ "reason": reason })),
            );
        }
        info!(%workflow_id, %reason, "workflow paused");
        Ok(token)
    }

    /// Resume a paused workflow. The token must match the one issued by
    /// [`pause`](Self::pause); a mismatch leaves the workflow paused.
    pub async fn resume(&self, workflow_id: &str, resume_token: &str) -> WorkflowResult<()> {
        let (exec_arc, sender) = self.entry(workflow_id).await?;
        {
            let mut exec = exec_arc.write().await;
            if exec.status != ExecutionStatus::Paused {
                return Err(WorkflowError::illegal_state("resume", exec.status));
            }
            if exec.resume_token.as_deref() != Some(resume_token) {
                return Err(WorkflowError::BadToken);
            }
            exec.status = ExecutionStatus::Running;
            exec.pause_reason = None;
            exec.resume_token = None;
            exec.touch();
        }
        if let Some(sender) = &sender {
            emit(
                sender,
                WorkflowEvent::new(WorkflowEventKind::WorkflowResumed, workflow_id),
            );
        }
        info!(%workflow_id, "workflow resumed");
        Ok(())
    }

    /// Cancel a non-terminal workflow. Best-effort: takes effect at the
    /// worker's next suspension point.
    pub async fn cancel(&self, workflow_id: &str) -> WorkflowResult<()> {
        let (exec_arc, sender) = self.entry(workflow_id).await?;
        let cancel = {
            let state = self.shared.state.read().await;
            state.cancellations.get(workflow_id).cloned()
        };
        {
            let mut exec = exec_arc.write().await;
            if exec.status.is_terminal() {
                return Err(WorkflowError::illegal_state("cancel", exec.status));
            }
            exec.status = ExecutionStatus::Cancelled;
            exec.pause_reason = None;
            exec.resume_token = None;
            exec.touch();
        }
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(sender) = &sender {
            emit(
                sender,
                WorkflowEvent::new(WorkflowEventKind::WorkflowCancelled, workflow_id),
            );
        }
        if let Err(err) = self
            .shared
            .store
            .srem(keys::ACTIVE_WORKFLOWS, workflow_id)
            .await
        {
            warn!(%err, %workflow_id, "failed to deregister cancelled workflow");
        }
        info!(%workflow_id, "workflow cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Snapshot one workflow: the in-memory execution when present (live
    /// or lingering), the persisted terminal record otherwise.
    pub async fn status(&self, workflow_id: &str) -> WorkflowResult<WorkflowStatus> {
        let exec_arc = {
            let state = self.shared.state.read().await;
            state.executions.get(workflow_id).cloned()
        };
        if let Some(exec_arc) = exec_arc {
            let exec = exec_arc.read().await;
            return Ok(WorkflowStatus::from_execution(&exec));
        }

        let raw = self
            .shared
            .store
            .get(&keys::workflow(workflow_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow '{workflow_id}'")))?;
        let record: WorkflowRecord = serde_json::from_str(&raw)?;
        Ok(WorkflowStatus::from_record(record))
    }

    /// Deep snapshot of one in-memory workflow, steps included.
    pub async fn details(&self, workflow_id: &str) -> WorkflowResult<WorkflowDetails> {
        let exec_arc = {
            let state = self.shared.state.read().await;
            state.executions.get(workflow_id).cloned()
        };
        let Some(exec_arc) = exec_arc else {
            return Err(WorkflowError::NotFound(format!("workflow '{workflow_id}'")));
        };
        let exec = exec_arc.read().await;
        Ok(WorkflowDetails {
            id: exec.id.clone(),
            status: exec.status,
            goal: exec.plan.goal.clone(),
            progress: exec.progress.clone(),
            execution_order: exec.plan.execution_order.clone(),
            steps: exec.plan.steps.clone(),
            started_at: exec.started_at,
            last_activity: exec.last_activity,
            error: exec.error.clone(),
            pause_reason: exec.pause_reason.clone(),
        })
    }

    /// Union of the in-memory active executions and the store's view
    /// (`active_workflows` members plus terminal records), deduplicated
    /// by id. The store side is bounded by the configured deadline and
    /// entry limit; hitting either returns partial results, never an
    /// error.
    pub async fn list_active(&self) -> Vec<WorkflowStatus> {
        let mut by_id: HashMap<String, WorkflowStatus> = HashMap::new();

        let in_memory: Vec<Arc<RwLock<WorkflowExecution>>> = {
            let state = self.shared.state.read().await;
            state.executions.values().cloned().collect()
        };
        for exec_arc in in_memory {
            let exec = exec_arc.read().await;
            by_id.insert(exec.id.clone(), WorkflowStatus::from_execution(&exec));
        }

        let known: HashSet<String> = by_id.keys().cloned().collect();
        match tokio::time::timeout(
            self.shared.config.list_deadline,
            self.store_statuses(&known),
        )
        .await
        {
            Ok(entries) => {
                for entry in entries {
                    by_id.entry(entry.id.clone()).or_insert(entry);
                }
            }
            Err(_) => {
                warn!("list_active store query hit its deadline, returning partial results");
            }
        }

        let mut statuses: Vec<WorkflowStatus> = by_id.into_values().collect();
        statuses.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));
        statuses
    }

    /// Store-side entries for `list_active`, most recent first, bounded
    /// by the configured limit. Store failures degrade to an empty or
    /// partial listing.
    async fn store_statuses(&self, known: &HashSet<String>) -> Vec<WorkflowStatus> {
        let store = &self.shared.store;
        let mut ids: HashSet<String> = HashSet::new();

        match store.smembers(keys::ACTIVE_WORKFLOWS).await {
            Ok(members) => ids.extend(members),
            Err(err) => warn!(%err, "active set unreadable, listing records only"),
        }
        match store.keys(keys::WORKFLOW_PATTERN).await {
            Ok(record_keys) => ids.extend(
                record_keys
                    .into_iter()
                    .filter_map(|key| key.strip_prefix("workflow:").map(String::from)),
            ),
            Err(err) => warn!(%err, "workflow records unreadable"),
        }

        let mut entries = Vec::new();
        for id in ids {
            if known.contains(&id) {
                continue;
            }
            match store.get(&keys::workflow(&id)).await {
                Ok(Some(raw)) => match serde_json::from_str::<WorkflowRecord>(&raw) {
                    Ok(record) => entries.push(WorkflowStatus::from_record(record)),
                    Err(err) => warn!(%id, %err, "skipping undecodable workflow record"),
                },
                Ok(None) => entries.push(WorkflowStatus::placeholder(id)),
                Err(err) => warn!(%id, %err, "workflow record unreadable"),
            }
        }

        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries.truncate(self.shared.config.list_limit);
        entries
    }

    /// Take the event stream of one workflow. Each channel has a single
    /// consumer; a second subscription is an illegal state.
    pub async fn subscribe(
        &self,
        workflow_id: &str,
    ) -> WorkflowResult<ReceiverStream<WorkflowEvent>> {
        let mut state = self.shared.state.write().await;
        let channel = state
            .channels
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow '{workflow_id}'")))?;
        let receiver = channel
            .receiver
            .take()
            .ok_or_else(|| WorkflowError::illegal_state("subscribe", "already subscribed"))?;
        Ok(ReceiverStream::new(receiver))
    }

    async fn entry(
        &self,
        workflow_id: &str,
    ) -> WorkflowResult<(Arc<RwLock<WorkflowExecution>>, Option<mpsc::Sender<WorkflowEvent>>)> {
        let state = self.shared.state.read().await;
        let exec = state
            .executions
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow '{workflow_id}'")))?;
        let sender = state.channels.get(workflow_id).map(|c| c.sender.clone());
        Ok((exec, sender))
    }
}

/// Non-blocking enqueue with drop-on-full semantics.
pub(crate) fn emit(sender: &mpsc::Sender<WorkflowEvent>, event: WorkflowEvent) {
    match sender.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(workflow_id = %event.workflow_id, kind = ?event.kind, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(event)) => {
            debug!(workflow_id = %event.workflow_id, kind = ?event.kind, "event channel closed");
        }
    }
}
