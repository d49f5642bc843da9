//! Flat planner — candidate generation, ranking, principles screening,
//! and execution with episode persistence.

use crate::evaluator::{Evaluator, Outcome};
use crate::registry::CapabilityRegistry;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use synapse_kernel::capability::Goal;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::executor::CapabilityExecutor;
use synapse_kernel::plan::{Episode, Plan};
use synapse_kernel::principles::{PrinciplesGate, PrinciplesVerdict};
use synapse_kernel::store::{keys, KvStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Defaults applied to generated single-step plans.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlannerConfig {
    /// Estimated cost of a generated step.
    pub step_cost: f64,
    /// Estimated utility of a generated plan.
    pub utility: f64,
    /// Risk estimate of a generated plan.
    pub risk: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_cost: 1.0,
            utility: 0.8,
            risk: 0.0,
        }
    }
}

/// Produces and ranks admissible flat plans, and runs the selected one.
pub struct Planner {
    registry: Arc<CapabilityRegistry>,
    evaluator: Arc<Evaluator>,
    principles: Arc<dyn PrinciplesGate>,
    executor: Arc<dyn CapabilityExecutor>,
    store: Arc<dyn KvStore>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        evaluator: Arc<Evaluator>,
        principles: Arc<dyn PrinciplesGate>,
        executor: Arc<dyn CapabilityExecutor>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            registry,
            evaluator,
            principles,
            executor,
            store,
            config: PlannerConfig::default(),
        }
    }

    /// Override the generation defaults.
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// One single-step candidate plan per matching capability, in registry
    /// rank order. External plan sources may prepend or append further
    /// candidates before scoring.
    pub async fn generate_plans(&self, goal: &Goal) -> WorkflowResult<Vec<Plan>> {
        let matches = self.registry.find_matching(goal).await?;
        Ok(matches
            .into_iter()
            .map(|capability| {
                Plan::single_step(
                    goal.clone(),
                    capability.id.clone(),
                    goal.params.clone(),
                    self.config.step_cost,
                    capability.score,
                )
                .with_utility(self.config.utility)
                .with_risk(self.config.risk)
            })
            .collect())
    }

    /// Score every plan and sort best-first (score, then utility).
    pub fn score_and_sort(&self, plans: &mut [Plan]) {
        for plan in plans.iter_mut() {
            plan.score = self.evaluator.plan_score(plan);
        }
        plans.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.estimated_utility
                        .partial_cmp(&a.estimated_utility)
                        .unwrap_or(Ordering::Equal)
                })
        });
    }

    /// Ask the principles service about one plan.
    pub async fn check_against_principles(&self, plan: &Plan) -> WorkflowResult<PrinciplesVerdict> {
        let body = serde_json::to_value(plan)?;
        self.principles.check_plan(&body).await
    }

    /// Generate, rank, and return the best admissible plan.
    pub async fn plan_and_select(&self, goal: &Goal) -> WorkflowResult<Plan> {
        self.plan_and_select_with(goal, Vec::new()).await
    }

    /// [`plan_and_select`](Self::plan_and_select) with caller-supplied
    /// extra candidates merged in before scoring.
    pub async fn plan_and_select_with(
        &self,
        goal: &Goal,
        extra: Vec<Plan>,
    ) -> WorkflowResult<Plan> {
        let mut plans = self.generate_plans(goal).await?;
        plans.extend(extra);
        if plans.is_empty() {
            return Err(WorkflowError::NoCandidates(goal.goal_type.clone()));
        }

        self.score_and_sort(&mut plans);
        for plan in plans {
            let verdict = self.check_against_principles(&plan).await?;
            if !verdict.blocked {
                debug!(plan_id = %plan.id, score = plan.score, "plan admitted");
                return Ok(plan);
            }
            info!(plan_id = %plan.id, reason = %verdict.reason, "plan blocked by principles");
        }
        Err(WorkflowError::NoAdmissiblePlan)
    }

    /// Run `plan` through the executor, persist an [`Episode`], and fold
    /// the outcome into the learned rates. Persistence and learning
    /// failures are logged and never mask the executor's result.
    pub async fn execute(&self, plan: &Plan, user_request: &str) -> WorkflowResult<Value> {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let outcome = self
            .executor
            .execute_plan(plan, &plan.id, &cancel)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.record_learning(plan, outcome.is_ok(), latency_ms).await;

        let result = match &outcome {
            Ok(value) => value.clone(),
            Err(err) => serde_json::json!({ "error": err.to_string() }),
        };
        self.persist_episode(plan, user_request, result).await;

        outcome
    }

    async fn record_learning(&self, plan: &Plan, success: bool, latency_ms: u64) {
        for step in &plan.steps {
            let capability = match self.registry.get(&step.capability_id).await {
                Ok(capability) => capability,
                // Synthetic capability from an external plan source.
                Err(_) => continue,
            };
            if let Err(err) = self
                .registry
                .record_outcome(&capability.id, &capability.task_name, success)
                .await
            {
                warn!(%err, capability = %capability.id, "failed to record outcome");
            }
            if success {
                if let Err(err) = self.registry.record_use(&capability.id).await {
                    warn!(%err, capability = %capability.id, "failed to stamp last_used");
                }
            }
            self.evaluator.record_outcome(
                &capability.task_name,
                &capability.language,
                Outcome {
                    success,
                    latency_ms,
                    violations: 0,
                },
            );
        }
    }

    async fn persist_episode(&self, plan: &Plan, user_request: &str, result: Value) {
        let episode = Episode::new(user_request, plan.clone(), result)
            .with_trace(format!(
                "goal '{}' planned as {} step(s)",
                plan.goal.goal_type,
                plan.steps.len()
            ))
            .with_trace(format!("selected plan {} with score {:.3}", plan.id, plan.score));

        let json = match serde_json::to_string(&episode) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "episode serialization failed");
                return;
            }
        };
        if let Err(err) = self.store.set(&keys::episode(&episode.id), &json).await {
            warn!(%err, episode = %episode.id, "episode persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKvStore;
    use serde_json::json;
    use synapse_kernel::capability::Capability;
    use synapse_testing::{MockExecutor, ScriptedPrinciples};

    struct Fixture {
        planner: Planner,
        registry: Arc<CapabilityRegistry>,
        store: Arc<MemoryKvStore>,
    }

    fn fixture(principles: ScriptedPrinciples, executor: MockExecutor) -> Fixture {
        let store = MemoryKvStore::shared();
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let planner = Planner::new(
            registry.clone(),
            Arc::new(Evaluator::new()),
            Arc::new(principles),
            Arc::new(executor),
            store.clone(),
        );
        Fixture {
            planner,
            registry,
            store,
        }
    }

    #[tokio::test]
    async fn no_candidates_when_nothing_matches() {
        let f = fixture(ScriptedPrinciples::allow_all(), MockExecutor::builder().build());
        let err = f.planner.plan_and_select(&Goal::new("Missing")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoCandidates(_)));
    }

    #[tokio::test]
    async fn selects_the_only_admissible_candidate() {
        let f = fixture(ScriptedPrinciples::allow_all(), MockExecutor::builder().build());
        let cap = f
            .registry
            .save(Capability::new("PrimeGen").with_score(0.9))
            .await
            .unwrap();

        let goal = Goal::new("PrimeGen").with_param("count", json!(10));
        let plan = f.planner.plan_and_select(&goal).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability_id, cap.id);
        assert_eq!(plan.steps[0].args["count"], json!(10));
        assert!(plan.score > 0.0);
    }

    #[tokio::test]
    async fn blocked_best_candidate_falls_through_to_second() {
        let store = MemoryKvStore::shared();
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let best = registry
            .save(Capability::new("PrimeGen").with_score(0.9))
            .await
            .unwrap();
        let second = registry
            .save(Capability::new("PrimeGenSlow").with_score(0.2))
            .await
            .unwrap();

        let planner = Planner::new(
            registry,
            Arc::new(Evaluator::new()),
            Arc::new(ScriptedPrinciples::blocking([best.id.as_str()])),
            Arc::new(MockExecutor::builder().build()),
            store,
        );

        let plan = planner.plan_and_select(&Goal::new("PrimeGen")).await.unwrap();
        assert_eq!(plan.steps[0].capability_id, second.id);
    }

    #[tokio::test]
    async fn all_blocked_is_no_admissible_plan() {
        let store = MemoryKvStore::shared();
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let cap = registry.save(Capability::new("PrimeGen")).await.unwrap();

        let planner = Planner::new(
            registry,
            Arc::new(Evaluator::new()),
            Arc::new(ScriptedPrinciples::blocking([cap.id.as_str()])),
            Arc::new(MockExecutor::builder().build()),
            store,
        );

        let err = planner.plan_and_select(&Goal::new("PrimeGen")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoAdmissiblePlan));
    }

    #[tokio::test]
    async fn principles_outage_propagates() {
        let f = fixture(ScriptedPrinciples::unavailable(), MockExecutor::builder().build());
        f.registry.save(Capability::new("PrimeGen")).await.unwrap();
        let err = f.planner.plan_and_select(&Goal::new("PrimeGen")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::PrinciplesUnavailable(_)));
    }

    #[tokio::test]
    async fn score_and_sort_orders_best_first() {
        let f = fixture(ScriptedPrinciples::allow_all(), MockExecutor::builder().build());
        let goal = Goal::new("g");
        let low = Plan::single_step(goal.clone(), "weak", Default::default(), 1.0, 0.1)
            .with_utility(0.8);
        let high = Plan::single_step(goal.clone(), "strong", Default::default(), 1.0, 0.9)
            .with_utility(0.8);

        let mut plans = vec![low, high];
        f.planner.score_and_sort(&mut plans);
        assert_eq!(plans[0].steps[0].capability_id, "strong");
        assert!(plans[0].score > plans[1].score);
    }

    #[tokio::test]
    async fn execute_persists_an_episode_and_learning() {
        let f = fixture(
            ScriptedPrinciples::allow_all(),
            MockExecutor::builder()
                .default_result(json!({"primes": [2, 3, 5]}))
                .build(),
        );
        let cap = f
            .registry
            .save(Capability::new("PrimeGen").with_score(0.9))
            .await
            .unwrap();
        let plan = f
            .planner
            .plan_and_select(&Goal::new("PrimeGen"))
            .await
            .unwrap();

        let result = f.planner.execute(&plan, "ten primes please").await.unwrap();
        assert_eq!(result["primes"][0], json!(2));

        let episodes = f.store.keys("episode:*").await.unwrap();
        assert_eq!(episodes.len(), 1);
        let episode: Episode =
            serde_json::from_str(&f.store.get(&episodes[0]).await.unwrap().unwrap()).unwrap();
        assert_eq!(episode.user_request, "ten primes please");
        assert_eq!(episode.selected_plan.id, plan.id);
        assert!(!episode.principles_check.blocked);

        let rate = f
            .store
            .get(&keys::capability_success_rate(&cap.id))
            .await
            .unwrap();
        assert_eq!(rate.as_deref(), Some("1.000000"));
        assert!(f.registry.get(&cap.id).await.unwrap().last_used.is_some());
    }

    #[tokio::test]
    async fn executor_failure_surfaces_but_still_records() {
        let f = fixture(
            ScriptedPrinciples::allow_all(),
            MockExecutor::builder().fail("boom").build(),
        );
        f.registry
            .save(Capability::new("PrimeGen").with_score(0.9))
            .await
            .unwrap();
        let plan = f.planner.plan_and_select(&Goal::new("PrimeGen")).await.unwrap();

        let err = f.planner.execute(&plan, "req").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Executor(_)));
        // The episode still records the failed round.
        assert_eq!(f.store.keys("episode:*").await.unwrap().len(), 1);
    }
}
