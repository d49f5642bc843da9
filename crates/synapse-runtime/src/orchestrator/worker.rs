//! Per-workflow execution worker.
//!
//! One worker owns one workflow: it runs the pass-based scheduling loop
//! over the plan's execution order, dispatches steps by type, converts
//! step errors into retries or workflow failure, and performs the
//! terminal transition. The worker owns its plan and context locally and
//! writes snapshots back into the shared execution under the lock at
//! every transition, so no lock is ever held across an await.

use super::{emit, metrics, record, retry::RetryLedger, Shared};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_foundation::substitute::{evaluate_predicate, substitute_args};
use synapse_kernel::capability::Goal;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::event::{WorkflowEvent, WorkflowEventKind};
use synapse_kernel::plan::Plan;
use synapse_kernel::workflow::{
    ExecutionContext, ExecutionStatus, HierarchicalPlan, StepStatus, StepType, WorkflowExecution,
    WorkflowStep,
};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a run ended before its plan resolved.
enum Abort {
    Cancelled,
    Failed(String),
}

/// Per-run step accounting, tracked locally so nested sub-plans can be
/// judged without touching the parent's progress.
#[derive(Debug, Clone, Copy)]
struct RunStats {
    total: usize,
    completed: usize,
    failed: usize,
    skipped: usize,
}

impl RunStats {
    fn is_success(&self) -> bool {
        self.failed == 0 && self.completed == self.total
    }
}

/// Result of one step dispatch.
enum StepOutcome {
    Completed(serde_json::Value),
    Skipped(serde_json::Value),
}

impl StepOutcome {
    fn into_value(self) -> serde_json::Value {
        match self {
            Self::Completed(value) | Self::Skipped(value) => value,
        }
    }
}

struct StepRunner {
    shared: Arc<Shared>,
    exec: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
    events: mpsc::Sender<WorkflowEvent>,
    workflow_id: String,
    retries: RetryLedger,
    /// Prefix applied to retry keys of nested sub-plan steps so they
    /// cannot collide with top-level step ids.
    retry_scope: String,
    /// Nested runs neither emit events nor write back into the shared
    /// execution.
    top_level: bool,
}

/// Entry point of the background worker spawned per workflow.
pub(crate) async fn run(
    shared: Arc<Shared>,
    exec: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
    events: mpsc::Sender<WorkflowEvent>,
) {
    let started = Instant::now();
    let (workflow_id, mut plan, mut context) = {
        let e = exec.read().await;
        (e.id.clone(), e.plan.clone(), e.context.clone())
    };

    let mut runner = StepRunner {
        shared: shared.clone(),
        exec: exec.clone(),
        cancel,
        events: events.clone(),
        workflow_id: workflow_id.clone(),
        retries: RetryLedger::new(shared.store.clone(), shared.config.retry_counter_ttl),
        retry_scope: String::new(),
        top_level: true,
    };

    let outcome = runner.run_plan(&mut plan, &mut context).await;
    {
        let mut e = exec.write().await;
        e.context = context.clone();
    }

    match outcome {
        Err(Abort::Cancelled) => {
            finish_cancelled(&shared, &workflow_id, &mut runner.retries, started).await;
        }
        Err(Abort::Failed(reason)) => {
            finish_failed(
                &shared,
                &exec,
                &events,
                &workflow_id,
                &mut runner.retries,
                started,
                reason,
            )
            .await;
        }
        Ok(stats) if stats.is_success() => {
            finish_success(
                &shared,
                &exec,
                &events,
                &workflow_id,
                &mut runner.retries,
                started,
            )
            .await;
        }
        Ok(stats) => {
            let reason = if stats.failed > 0 {
                format!("workflow completed with {} failed steps", stats.failed)
            } else {
                format!(
                    "workflow incomplete: {}/{} steps completed",
                    stats.completed, stats.total
                )
            };
            finish_failed(
                &shared,
                &exec,
                &events,
                &workflow_id,
                &mut runner.retries,
                started,
                reason,
            )
            .await;
        }
    }
}

impl StepRunner {
    // -----------------------------------------------------------------------
    // Scheduling loop
    // -----------------------------------------------------------------------

    /// Drive one plan to resolution: repeated passes over the execution
    /// order, executing every ready pending step, until the pending set
    /// drains or a pass starves.
    async fn run_plan(
        &mut self,
        plan: &mut HierarchicalPlan,
        context: &mut ExecutionContext,
    ) -> Result<RunStats, Abort> {
        let order = plan.execution_order.clone();
        let goal = plan.goal.clone();
        let wid = self.workflow_id.clone();
        let mut pending: HashSet<String> = order.iter().cloned().collect();
        let mut stats = RunStats {
            total: plan.steps.len(),
            completed: 0,
            failed: 0,
            skipped: 0,
        };

        while !pending.is_empty() {
            let mut processed = 0usize;

            for step_id in &order {
                if !pending.contains(step_id) {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    return Err(Abort::Cancelled);
                }
                self.wait_while_paused().await?;

                // pending → running, once every dependency has resolved.
                let snapshot = {
                    let Some(step) = plan.step_mut(step_id) else {
                        pending.remove(step_id);
                        continue;
                    };
                    if !step.dependencies_met(&context.step_results) {
                        continue;
                    }
                    step.status = StepStatus::Running;
                    step.started_at = Some(Utc::now());
                    step.clone()
                };
                self.sync_exec(|e| {
                    if let Some(step) = e.plan.step_mut(step_id) {
                        *step = snapshot.clone();
                    }
                    e.progress.current_step = Some(step_id.clone());
                })
                .await;
                self.emit(WorkflowEvent::for_step(
                    WorkflowEventKind::StepStarted,
                    &wid,
                    step_id,
                ));
                debug!(workflow_id = %wid, step = %step_id, "step started");

                let result = self.execute_step(context, &snapshot, &goal).await;
                if self.cancel.is_cancelled() {
                    return Err(Abort::Cancelled);
                }

                match result {
                    Ok(outcome) => {
                        let (status, skipped) = match &outcome {
                            StepOutcome::Completed(_) => (StepStatus::Completed, false),
                            StepOutcome::Skipped(_) => (StepStatus::Skipped, true),
                        };
                        let value = outcome.into_value();
                        let updated = {
                            let Some(step) = plan.step_mut(step_id) else {
                                pending.remove(step_id);
                                continue;
                            };
                            step.status = status;
                            step.completed_at = Some(Utc::now());
                            step.result = Some(value.clone());
                            step.error = None;
                            step.clone()
                        };
                        context.record_result(step_id.clone(), value);
                        if !skipped {
                            context.apply_postconditions(&updated.postconditions);
                        }
                        let key = self.scoped(step_id);
                        self.retries.clear(&wid, &key).await;

                        stats.completed += 1;
                        if skipped {
                            stats.skipped += 1;
                        }
                        self.sync_exec(|e| {
                            if let Some(step) = e.plan.step_mut(step_id) {
                                *step = updated.clone();
                            }
                            e.context = context.clone();
                            e.progress.completed += 1;
                            if skipped {
                                e.progress.skipped += 1;
                            }
                            e.progress.recalculate();
                            e.progress.current_step = None;
                        })
                        .await;
                        let mut event = WorkflowEvent::for_step(
                            WorkflowEventKind::StepCompleted,
                            &wid,
                            step_id,
                        );
                        if skipped {
                            event = event.with_data(json!({ "skipped": true }));
                        }
                        self.emit(event);
                        debug!(workflow_id = %wid, step = %step_id, skipped, "step resolved");

                        pending.remove(step_id);
                        processed += 1;
                    }
                    Err(err) => {
                        let key = self.scoped(step_id);
                        let used = self.retries.current(&wid, &key).await;
                        if used < snapshot.max_retries {
                            let count = self.retries.increment(&wid, &key).await;
                            let updated = {
                                let Some(step) = plan.step_mut(step_id) else {
                                    pending.remove(step_id);
                                    continue;
                                };
                                step.status = StepStatus::Pending;
                                step.error = Some(err.to_string());
                                step.clone()
                            };
                            self.sync_exec(|e| {
                                if let Some(step) = e.plan.step_mut(step_id) {
                                    *step = updated.clone();
                                }
                                e.progress.current_step = None;
                            })
                            .await;
                            self.emit(
                                WorkflowEvent::for_step(
                                    WorkflowEventKind::StepRetry,
                                    &wid,
                                    step_id,
                                )
                                .with_data(json!({
                                    "retry_count": count,
                                    "error": err.to_string(),
                                })),
                            );
                            debug!(workflow_id = %wid, step = %step_id, retry = count, "step retrying");
                            processed += 1;
                        } else {
                            let updated = {
                                let Some(step) = plan.step_mut(step_id) else {
                                    pending.remove(step_id);
                                    continue;
                                };
                                step.status = StepStatus::Failed;
                                step.completed_at = Some(Utc::now());
                                step.error = Some(err.to_string());
                                step.clone()
                            };
                            stats.failed += 1;
                            self.sync_exec(|e| {
                                if let Some(step) = e.plan.step_mut(step_id) {
                                    *step = updated.clone();
                                }
                                e.progress.failed += 1;
                                e.progress.current_step = None;
                            })
                            .await;
                            self.emit(
                                WorkflowEvent::for_step(
                                    WorkflowEventKind::StepFailed,
                                    &wid,
                                    step_id,
                                )
                                .with_data(json!({ "error": err.to_string() })),
                            );
                            warn!(workflow_id = %wid, step = %step_id, %err, "step failed");

                            if snapshot.critical {
                                return Err(Abort::Failed(format!(
                                    "critical step '{step_id}' failed: {err}"
                                )));
                            }
                            pending.remove(step_id);
                            processed += 1;
                        }
                    }
                }
            }

            if pending.is_empty() {
                break;
            }
            if processed == 0 {
                let starved: Vec<String> = order
                    .iter()
                    .filter(|id| pending.contains(*id))
                    .cloned()
                    .collect();
                let message = WorkflowError::Deadlock(format!(
                    "no executable step in a full pass; starved steps: [{}]",
                    starved.join(", ")
                ))
                .to_string();
                return Err(Abort::Failed(message));
            }
        }

        Ok(stats)
    }

    /// Cooperative wait while the workflow is paused, polling at the
    /// configured cadence. Cancellation wins over pause.
    async fn wait_while_paused(&self) -> Result<(), Abort> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            let status = { self.exec.read().await.status };
            match status {
                ExecutionStatus::Paused => {
                    tokio::time::sleep(self.shared.config.pause_poll_interval).await;
                }
                ExecutionStatus::Cancelled => return Err(Abort::Cancelled),
                _ => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Step dispatch
    // -----------------------------------------------------------------------

    async fn execute_step(
        &mut self,
        context: &mut ExecutionContext,
        step: &WorkflowStep,
        goal: &Goal,
    ) -> WorkflowResult<StepOutcome> {
        match step.step_type {
            StepType::Capability => self.execute_capability(context, step, goal).await,
            StepType::Subgoal => self.execute_subgoal(context, step).await,
            StepType::Condition => {
                let predicate = step.condition.clone().unwrap_or_default();
                if evaluate_predicate(&predicate, &context.state) {
                    Ok(StepOutcome::Completed(json!(true)))
                } else {
                    Ok(StepOutcome::Skipped(json!(false)))
                }
            }
            StepType::Loop => self.execute_loop(context, step, goal).await,
        }
    }

    async fn execute_capability(
        &mut self,
        _context: &mut ExecutionContext,
        step: &WorkflowStep,
        goal: &Goal,
    ) -> WorkflowResult<StepOutcome> {
        let capability_id = step.capability_id.as_deref().ok_or_else(|| {
            WorkflowError::InvalidPlan(format!("capability step '{}' names no capability", step.id))
        })?;
        let flat = Plan::single_step(
            goal.clone(),
            capability_id,
            step.args.clone(),
            step.estimated_cost,
            step.confidence,
        );
        let seconds = self.effective_timeout_secs(step).max(1);
        let call = self
            .shared
            .executor
            .execute_plan(&flat, &self.workflow_id, &self.cancel);
        match tokio::time::timeout(Duration::from_secs(seconds), call).await {
            Ok(Ok(value)) => Ok(StepOutcome::Completed(value)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(WorkflowError::Timeout { seconds }),
        }
    }

    /// Expand the nested goal and run its plan in place, against a child
    /// context. The nested run shares this workflow's pause and cancel
    /// state but neither emits events nor touches top-level progress.
    async fn execute_subgoal(
        &mut self,
        context: &mut ExecutionContext,
        step: &WorkflowStep,
    ) -> WorkflowResult<StepOutcome> {
        let sub_goal = step.sub_goal.clone().ok_or_else(|| {
            WorkflowError::InvalidPlan(format!("subgoal step '{}' names no goal", step.id))
        })?;
        let mut child_plan = self
            .shared
            .planner
            .generate_hierarchical_plan(&sub_goal)
            .await?;
        let mut child_context = context.child_for(child_plan.id.clone());

        let seconds = if step.timeout_secs > 0 {
            step.timeout_secs
        } else {
            child_plan
                .steps
                .iter()
                .map(|s| self.effective_timeout_secs(s))
                .sum()
        };

        let saved_top = self.top_level;
        let saved_scope = self.retry_scope.clone();
        self.top_level = false;
        self.retry_scope = format!("{saved_scope}{}.", step.id);

        let nested = Box::pin(self.run_plan(&mut child_plan, &mut child_context));
        let outcome = if seconds > 0 {
            match tokio::time::timeout(Duration::from_secs(seconds), nested).await {
                Ok(result) => Some(result),
                Err(_) => None,
            }
        } else {
            Some(nested.await)
        };

        self.top_level = saved_top;
        self.retry_scope = saved_scope;

        match outcome {
            None => Err(WorkflowError::Timeout { seconds }),
            Some(Err(Abort::Cancelled)) => {
                Err(WorkflowError::Executor("workflow cancelled".into()))
            }
            Some(Err(Abort::Failed(reason))) => Err(WorkflowError::Executor(reason)),
            Some(Ok(stats)) if stats.is_success() => {
                let results = serde_json::to_value(&child_context.step_results)?;
                Ok(StepOutcome::Completed(results))
            }
            Some(Ok(stats)) => Err(WorkflowError::Executor(format!(
                "sub-plan for goal '{}' resolved {}/{} steps with {} failed",
                sub_goal.goal_type, stats.completed, stats.total, stats.failed
            ))),
        }
    }

    /// Run the templated child while the guard holds, up to the iteration
    /// cap. Each iteration gets a suffixed id and the loop variable bound
    /// to its index. An iteration error fails the whole step.
    async fn execute_loop(
        &mut self,
        context: &mut ExecutionContext,
        step: &WorkflowStep,
        goal: &Goal,
    ) -> WorkflowResult<StepOutcome> {
        let config = step.loop_config.clone().ok_or_else(|| {
            WorkflowError::InvalidPlan(format!("loop step '{}' has no loop config", step.id))
        })?;
        let Some(template) = step.children.first().cloned() else {
            return Ok(StepOutcome::Completed(json!([])));
        };

        let per_iteration = self.effective_timeout_secs(&template);
        let seconds = if step.timeout_secs > 0 {
            step.timeout_secs
        } else {
            per_iteration.saturating_mul(u64::from(config.max_iterations))
        };

        let iterations = async {
            let mut results = Vec::new();
            for index in 0..config.max_iterations {
                if !evaluate_predicate(&config.condition, &context.state) {
                    break;
                }
                if self.cancel.is_cancelled() {
                    return Err(WorkflowError::Executor("workflow cancelled".into()));
                }
                let mut iteration = template.clone();
                iteration.reset_execution_state();
                iteration.id = format!("{}_iteration_{}", template.id, index);
                let bindings =
                    HashMap::from([(config.variable.clone(), json!(index))]);
                iteration.args = substitute_args(&iteration.args, &bindings);

                let outcome = Box::pin(self.execute_step(context, &iteration, goal)).await?;
                if matches!(outcome, StepOutcome::Completed(_)) {
                    context.apply_postconditions(&iteration.postconditions);
                }
                results.push(outcome.into_value());
            }
            Ok(json!(results))
        };

        let result = if seconds > 0 {
            match tokio::time::timeout(Duration::from_secs(seconds), iterations).await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::Timeout { seconds }),
            }
        } else {
            iterations.await
        };
        result.map(StepOutcome::Completed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Per-step timeout: the explicit value when set, the configured
    /// default for capability and subgoal steps, zero for conditions, and
    /// the child sum times the iteration cap for loops.
    fn effective_timeout_secs(&self, step: &WorkflowStep) -> u64 {
        if step.timeout_secs > 0 {
            return step.timeout_secs;
        }
        match step.step_type {
            StepType::Capability | StepType::Subgoal => {
                self.shared.config.default_step_timeout.as_secs()
            }
            StepType::Condition => 0,
            StepType::Loop => {
                let per_iteration: u64 = step
                    .children
                    .iter()
                    .map(|child| self.effective_timeout_secs(child))
                    .sum();
                let cap = step
                    .loop_config
                    .as_ref()
                    .map(|c| u64::from(c.max_iterations))
                    .unwrap_or(0);
                per_iteration.saturating_mul(cap)
            }
        }
    }

    fn scoped(&self, step_id: &str) -> String {
        format!("{}{}", self.retry_scope, step_id)
    }

    fn emit(&self, event: WorkflowEvent) {
        if self.top_level {
            emit(&self.events, event);
        }
    }

    /// Write a snapshot back into the shared execution. No-op for nested
    /// runs.
    async fn sync_exec<F>(&self, apply: F)
    where
        F: FnOnce(&mut WorkflowExecution),
    {
        if !self.top_level {
            return;
        }
        let mut exec = self.exec.write().await;
        apply(&mut exec);
        exec.last_activity = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Terminal transitions
// ---------------------------------------------------------------------------

async fn finish_success(
    shared: &Arc<Shared>,
    exec: &Arc<RwLock<WorkflowExecution>>,
    events: &mpsc::Sender<WorkflowEvent>,
    workflow_id: &str,
    retries: &mut RetryLedger,
    started: Instant,
) {
    {
        let mut e = exec.write().await;
        if e.status == ExecutionStatus::Cancelled {
            drop(e);
            finish_cancelled(shared, workflow_id, retries, started).await;
            return;
        }
        e.status = ExecutionStatus::Completed;
        e.error = None;
        e.pause_reason = None;
        e.resume_token = None;
        e.progress.current_step = None;
        e.progress.recalculate();
        e.touch();
    }
    let snapshot = { exec.read().await.clone() };

    let artifacts = record::collect_artifacts(
        &*shared.store,
        workflow_id,
        shared.config.max_inline_artifact_bytes,
    )
    .await;
    if let Err(err) =
        record::persist_completed(&*shared.store, &snapshot, artifacts, shared.config.record_ttl)
            .await
    {
        warn!(%err, %workflow_id, "terminal record persistence failed");
    }
    if let Err(err) = shared
        .store
        .srem(synapse_kernel::store::keys::ACTIVE_WORKFLOWS, workflow_id)
        .await
    {
        warn!(%err, %workflow_id, "failed to deregister completed workflow");
    }
    metrics::record_terminal(&*shared.store, true, started.elapsed()).await;

    emit(
        events,
        WorkflowEvent::new(WorkflowEventKind::WorkflowCompleted, workflow_id).with_data(
            serde_json::to_value(&snapshot.progress).unwrap_or(serde_json::Value::Null),
        ),
    );
    info!(%workflow_id, duration_ms = started.elapsed().as_millis() as u64, "workflow completed");

    // The channel closes now; the execution lingers briefly so fast
    // status polls skip the store.
    {
        let mut state = shared.state.write().await;
        state.channels.remove(workflow_id);
        state.cancellations.remove(workflow_id);
    }
    let shared = shared.clone();
    let workflow_id = workflow_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(shared.config.completed_linger).await;
        shared.state.write().await.executions.remove(&workflow_id);
    });
}

async fn finish_failed(
    shared: &Arc<Shared>,
    exec: &Arc<RwLock<WorkflowExecution>>,
    events: &mpsc::Sender<WorkflowEvent>,
    workflow_id: &str,
    retries: &mut RetryLedger,
    started: Instant,
    reason: String,
) {
    {
        let mut e = exec.write().await;
        if e.status == ExecutionStatus::Cancelled {
            drop(e);
            finish_cancelled(shared, workflow_id, retries, started).await;
            return;
        }
        e.status = ExecutionStatus::Failed;
        e.error = Some(reason.clone());
        e.pause_reason = None;
        e.resume_token = None;
        e.progress.current_step = None;
        e.touch();
    }

    emit(
        events,
        WorkflowEvent::new(WorkflowEventKind::WorkflowFailed, workflow_id)
            .with_data(json!({ "error": reason })),
    );
    warn!(%workflow_id, %reason, "workflow failed");

    if let Err(err) = shared
        .store
        .srem(synapse_kernel::store::keys::ACTIVE_WORKFLOWS, workflow_id)
        .await
    {
        warn!(%err, %workflow_id, "failed to deregister failed workflow");
    }
    retries.clear_all(workflow_id).await;
    metrics::record_terminal(&*shared.store, false, started.elapsed()).await;
    remove_immediately(shared, workflow_id).await;
}

async fn finish_cancelled(
    shared: &Arc<Shared>,
    workflow_id: &str,
    retries: &mut RetryLedger,
    started: Instant,
) {
    // Status and the cancellation event were handled by `cancel`.
    if let Err(err) = shared
        .store
        .srem(synapse_kernel::store::keys::ACTIVE_WORKFLOWS, workflow_id)
        .await
    {
        warn!(%err, %workflow_id, "failed to deregister cancelled workflow");
    }
    retries.clear_all(workflow_id).await;
    metrics::record_terminal(&*shared.store, false, started.elapsed()).await;
    remove_immediately(shared, workflow_id).await;
    info!(%workflow_id, "workflow worker stopped after cancellation");
}

async fn remove_immediately(shared: &Arc<Shared>, workflow_id: &str) {
    let mut state = shared.state.write().await;
    state.executions.remove(workflow_id);
    state.channels.remove(workflow_id);
    state.cancellations.remove(workflow_id);
}
