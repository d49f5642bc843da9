//! Flat plan model — an ordered list of capability invocations for one
//! goal, plus the [`Episode`] record persisted after each execution.

use crate::capability::Goal;
use crate::principles::PrinciplesVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One capability invocation inside a flat [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// The capability to invoke. References an existing registry record or
    /// a synthetic one supplied by an external plan source.
    pub capability_id: String,

    /// Named arguments passed to the capability.
    #[serde(default)]
    pub args: HashMap<String, Value>,

    /// Estimated execution cost, ≥ 0.
    #[serde(default)]
    pub estimated_cost: f64,

    /// Confidence the step will succeed, in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

/// An ordered list of capability invocations for a single goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier, fresh per planning request.
    pub id: String,

    /// The goal this plan serves.
    pub goal: Goal,

    /// Ordered steps. Never empty for a well-formed plan.
    pub steps: Vec<PlanStep>,

    /// Estimated utility of completing the plan.
    #[serde(default)]
    pub estimated_utility: f64,

    /// Risk estimate in `[0, 1]` fed into scoring.
    #[serde(default)]
    pub principles_risk: f64,

    /// Derived preference score. Written by the evaluator, never an input.
    #[serde(default)]
    pub score: f64,
}

impl Plan {
    /// Build a one-step plan invoking a single capability.
    pub fn single_step(
        goal: Goal,
        capability_id: impl Into<String>,
        args: HashMap<String, Value>,
        estimated_cost: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal,
            steps: vec![PlanStep {
                capability_id: capability_id.into(),
                args,
                estimated_cost,
                confidence,
            }],
            estimated_utility: 0.0,
            principles_risk: 0.0,
            score: 0.0,
        }
    }

    /// Set the estimated utility.
    pub fn with_utility(mut self, utility: f64) -> Self {
        self.estimated_utility = utility;
        self
    }

    /// Set the risk estimate.
    pub fn with_risk(mut self, risk: f64) -> Self {
        self.principles_risk = risk;
        self
    }

    /// Sum of per-step estimated costs.
    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.estimated_cost).sum()
    }

    /// Arithmetic mean of per-step confidence, 0.0 for an empty plan.
    pub fn mean_confidence(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.confidence).sum::<f64>() / self.steps.len() as f64
    }
}

/// Immutable record of one planning-and-execution round, persisted under
/// `episode:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode identifier.
    pub id: String,

    /// When the episode was written.
    pub timestamp: DateTime<Utc>,

    /// The request text that produced the plan.
    pub user_request: String,

    /// The plan that was executed.
    pub selected_plan: Plan,

    /// Human-readable trace of how the plan was chosen.
    #[serde(default)]
    pub decision_trace: Vec<String>,

    /// The executor's result, verbatim.
    pub result: Value,

    /// The admissibility verdict under which the plan ran.
    pub principles_check: PrinciplesVerdict,
}

impl Episode {
    /// Create an episode with a fresh id and the current timestamp.
    pub fn new(user_request: impl Into<String>, selected_plan: Plan, result: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_request: user_request.into(),
            selected_plan,
            decision_trace: Vec::new(),
            result,
            principles_check: PrinciplesVerdict::admitted(),
        }
    }

    /// Append a trace line.
    pub fn with_trace(mut self, line: impl Into<String>) -> Self {
        self.decision_trace.push(line.into());
        self
    }

    /// Record the verdict the plan was admitted under.
    pub fn with_verdict(mut self, verdict: PrinciplesVerdict) -> Self {
        self.principles_check = verdict;
        self
    }
}
