//! Hierarchical planner — expands goals into workflow plans, optionally
//! through registered templates.
//!
//! Templates live in an in-memory index and in the store under
//! `workflow_template:<id>`; startup reconciliation lets the store win.
//! Lacking a template, a goal falls back to a single capability step
//! chosen by the registry's ranking.

use crate::registry::CapabilityRegistry;
use crate::substitute::{referenced_placeholders, substitute_args};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use synapse_kernel::capability::Goal;
use synapse_kernel::error::{WorkflowError, WorkflowResult};
use synapse_kernel::principles::{PrinciplesGate, PrinciplesVerdict};
use synapse_kernel::store::{keys, KvStore};
use synapse_kernel::workflow::{HierarchicalPlan, WorkflowStep, WorkflowTemplate};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Goal param that names a template explicitly, overriding type matching.
const TEMPLATE_HINT_PARAM: &str = "template";

/// Turns goals into [`HierarchicalPlan`]s and manages templates.
pub struct HierarchicalPlanner {
    registry: Arc<CapabilityRegistry>,
    principles: Arc<dyn PrinciplesGate>,
    store: Arc<dyn KvStore>,
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl HierarchicalPlanner {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        principles: Arc<dyn PrinciplesGate>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            registry,
            principles,
            store,
            templates: RwLock::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    /// Register a template in the in-memory index and the store, stamping
    /// `updated_at`.
    pub async fn register_template(&self, mut template: WorkflowTemplate) -> WorkflowResult<()> {
        validate_template(&template)?;
        template.updated_at = chrono::Utc::now();

        let json = serde_json::to_string(&template)
            .map_err(|err| WorkflowError::Decode(err.to_string()))?;
        self.store
            .set(&keys::workflow_template(&template.id), &json)
            .await?;
        info!(id = %template.id, "workflow template registered");
        self.templates
            .write()
            .await
            .insert(template.id.clone(), template);
        Ok(())
    }

    /// Reconcile the in-memory index with the store. Where both hold a
    /// template id, the store wins. Returns the number of templates
    /// loaded from the store.
    pub async fn load_templates(&self) -> WorkflowResult<usize> {
        let mut loaded = 0;
        let mut templates = self.templates.write().await;
        for key in self.store.keys(keys::WORKFLOW_TEMPLATE_PATTERN).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<WorkflowTemplate>(&raw) {
                Ok(template) => {
                    templates.insert(template.id.clone(), template);
                    loaded += 1;
                }
                Err(err) => warn!(%key, %err, "skipping undecodable template record"),
            }
        }
        Ok(loaded)
    }

    /// Fetch one template, store first, memory as fallback.
    pub async fn load_template(&self, id: &str) -> WorkflowResult<WorkflowTemplate> {
        if let Some(raw) = self.store.get(&keys::workflow_template(id)).await? {
            let template = serde_json::from_str(&raw)?;
            return Ok(template);
        }
        self.templates
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("template '{id}'")))
    }

    /// Snapshot of the in-memory template index.
    pub async fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.templates.read().await.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Plan generation
    // -----------------------------------------------------------------------

    /// Expand a goal into a workflow plan with a valid execution order.
    ///
    /// A registered template matching the goal's `template` hint or its
    /// type is instantiated with parameters bound from the goal's params;
    /// otherwise the goal becomes a single capability step chosen by the
    /// registry's ranking.
    pub async fn generate_hierarchical_plan(&self, goal: &Goal) -> WorkflowResult<HierarchicalPlan> {
        if let Some(template) = self.match_template(goal).await {
            debug!(template = %template.id, goal = %goal.goal_type, "instantiating template");
            return Ok(instantiate(&template, goal));
        }

        let matches = self.registry.find_matching(goal).await?;
        let Some(best) = matches.into_iter().next() else {
            return Err(WorkflowError::NoCandidates(goal.goal_type.clone()));
        };

        let step = WorkflowStep::capability("step_1", &best.id)
            .with_args(goal.params.clone())
            .with_confidence(best.score)
            .with_cost(1.0);
        Ok(HierarchicalPlan::new(goal.clone()).add_step(step).finalize())
    }

    /// Ask the principles service about a hierarchical plan.
    pub async fn check_plan_against_principles(
        &self,
        plan: &HierarchicalPlan,
    ) -> WorkflowResult<PrinciplesVerdict> {
        let body = serde_json::to_value(plan)?;
        self.principles.check_plan(&body).await
    }

    async fn match_template(&self, goal: &Goal) -> Option<WorkflowTemplate> {
        let templates = self.templates.read().await;
        if let Some(hint) = goal.params.get(TEMPLATE_HINT_PARAM).and_then(Value::as_str) {
            if let Some(template) = templates.get(hint) {
                return Some(template.clone());
            }
        }
        templates.get(&goal.goal_type).cloned()
    }
}

/// Every `${name}` referenced in a template's step args must be declared
/// in its parameter list.
fn validate_template(template: &WorkflowTemplate) -> WorkflowResult<()> {
    let mut steps: Vec<&WorkflowStep> = template.steps.iter().collect();
    while let Some(step) = steps.pop() {
        for value in step.args.values() {
            let Value::String(text) = value else { continue };
            for name in referenced_placeholders(text) {
                if !template.parameters.contains(&name) {
                    return Err(WorkflowError::InvalidPlan(format!(
                        "template '{}' references undeclared parameter '{}'",
                        template.id, name
                    )));
                }
            }
        }
        steps.extend(step.children.iter());
    }
    Ok(())
}

/// Instantiate a template for a goal: bind declared parameters from the
/// goal's params, substitute them through every step's args, reset
/// lifecycle state, and mark instantiated steps non-critical.
fn instantiate(template: &WorkflowTemplate, goal: &Goal) -> HierarchicalPlan {
    let bindings: HashMap<String, Value> = template
        .parameters
        .iter()
        .filter_map(|name| goal.params.get(name).map(|v| (name.clone(), v.clone())))
        .collect();

    let mut plan = HierarchicalPlan::new(goal.clone());
    plan.template_id = Some(template.id.clone());
    for step in &template.steps {
        plan.steps.push(instantiate_step(step, &bindings));
    }
    plan.finalize()
}

fn instantiate_step(step: &WorkflowStep, bindings: &HashMap<String, Value>) -> WorkflowStep {
    let mut instantiated = step.clone();
    instantiated.reset_execution_state();
    instantiated.args = substitute_args(&step.args, bindings);
    instantiated.critical = false;
    instantiated.children = step
        .children
        .iter()
        .map(|child| instantiate_step(child, bindings))
        .collect();
    instantiated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKvStore;
    use serde_json::json;
    use synapse_kernel::capability::Capability;
    use synapse_kernel::workflow::StepType;
    use synapse_testing::ScriptedPrinciples;

    fn planner() -> (HierarchicalPlanner, Arc<CapabilityRegistry>, Arc<MemoryKvStore>) {
        let store = MemoryKvStore::shared();
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let planner = HierarchicalPlanner::new(
            registry.clone(),
            Arc::new(ScriptedPrinciples::allow_all()),
            store.clone(),
        );
        (planner, registry, store)
    }

    fn two_step_template() -> WorkflowTemplate {
        WorkflowTemplate::new("deploy", "Deploy")
            .with_parameter("version")
            .with_step(
                WorkflowStep::capability("build", "builder")
                    .with_arg("version", json!("${version}"))
                    .with_postcondition("built"),
            )
            .with_step(
                WorkflowStep::capability("push", "pusher")
                    .with_arg("label", json!("release-${version}"))
                    .depends_on("build"),
            )
    }

    #[tokio::test]
    async fn register_then_load_round_trips_modulo_updated_at() {
        let (planner, _, _) = planner();
        let template = two_step_template();
        planner.register_template(template.clone()).await.unwrap();

        let loaded = planner.load_template("deploy").await.unwrap();
        assert_eq!(loaded.id, template.id);
        assert_eq!(loaded.steps, template.steps);
        assert_eq!(loaded.parameters, template.parameters);
        assert!(loaded.updated_at >= template.updated_at);
    }

    #[tokio::test]
    async fn undeclared_parameter_is_rejected() {
        let (planner, _, _) = planner();
        let template = WorkflowTemplate::new("bad", "Bad").with_step(
            WorkflowStep::capability("s", "cap").with_arg("v", json!("${ghost}")),
        );
        let err = planner.register_template(template).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn reconciliation_prefers_the_store() {
        let (planner, _, store) = planner();
        planner
            .register_template(WorkflowTemplate::new("deploy", "Stale"))
            .await
            .unwrap();

        // Another process rewrote the record out from under us.
        let mut fresh = WorkflowTemplate::new("deploy", "Fresh");
        fresh.steps.push(WorkflowStep::capability("s", "cap"));
        store
            .set(
                &keys::workflow_template("deploy"),
                &serde_json::to_string(&fresh).unwrap(),
            )
            .await
            .unwrap();

        let loaded = planner.load_templates().await.unwrap();
        assert_eq!(loaded, 1);
        let templates = planner.list_templates().await;
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "Fresh");
    }

    #[tokio::test]
    async fn template_instantiation_binds_params_and_clears_criticality() {
        let (planner, _, _) = planner();
        planner.register_template(two_step_template()).await.unwrap();

        let goal = Goal::new("deploy").with_param("version", json!("1.2.3"));
        let plan = planner.generate_hierarchical_plan(&goal).await.unwrap();

        assert_eq!(plan.template_id.as_deref(), Some("deploy"));
        assert_eq!(plan.execution_order, vec!["build", "push"]);
        let build = plan.step("build").unwrap();
        assert_eq!(build.args["version"], json!("1.2.3"));
        assert!(!build.critical);
        let push = plan.step("push").unwrap();
        assert_eq!(push.args["label"], json!("release-1.2.3"));
    }

    #[tokio::test]
    async fn template_hint_param_overrides_type_matching() {
        let (planner, _, _) = planner();
        planner.register_template(two_step_template()).await.unwrap();

        let goal = Goal::new("SomethingElse")
            .with_param("template", json!("deploy"))
            .with_param("version", json!("2.0.0"));
        let plan = planner.generate_hierarchical_plan(&goal).await.unwrap();
        assert_eq!(plan.template_id.as_deref(), Some("deploy"));
    }

    #[tokio::test]
    async fn fallback_emits_a_single_ranked_capability_step() {
        let (planner, registry, _) = planner();
        registry
            .save(Capability::new("PrimeGen").with_score(0.3))
            .await
            .unwrap();
        let best = registry
            .save(Capability::new("PrimeGenFast").with_score(0.9))
            .await
            .unwrap();

        let goal = Goal::new("PrimeGen").with_param("count", json!(10));
        let plan = planner.generate_hierarchical_plan(&goal).await.unwrap();

        assert_eq!(plan.steps.len(), 1);
        let step = &plan.steps[0];
        assert_eq!(step.step_type, StepType::Capability);
        assert_eq!(step.capability_id.as_deref(), Some(best.id.as_str()));
        assert_eq!(step.args["count"], json!(10));
        assert!(step.critical);
        assert_eq!(plan.execution_order, vec!["step_1"]);
    }

    #[tokio::test]
    async fn no_template_and_no_capability_is_no_candidates() {
        let (planner, _, _) = planner();
        let err = planner
            .generate_hierarchical_plan(&Goal::new("Missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NoCandidates(_)));
    }

    #[tokio::test]
    async fn hierarchical_plans_are_screened_by_principles() {
        let store = MemoryKvStore::shared();
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let planner = HierarchicalPlanner::new(
            registry,
            Arc::new(ScriptedPrinciples::blocking(["forbidden"])),
            store,
        );

        let plan = HierarchicalPlan::new(Goal::new("g"))
            .add_step(WorkflowStep::capability("s", "forbidden"))
            .finalize();
        let verdict = planner.check_plan_against_principles(&plan).await.unwrap();
        assert!(verdict.blocked);
    }
}
