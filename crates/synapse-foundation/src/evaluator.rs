//! Option and plan scoring, with an optional feedback-weighted variant.
//!
//! The base scores are pure functions of their inputs; the feedback
//! tracker folds in a rolling window of observed outcomes per
//! `(task_name, language)` pair. All weights are configuration.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use synapse_kernel::plan::Plan;

/// Weights of the plan scoring formula
/// `utility·U − cost·ΣC − risk·R + confidence·mean(conf)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvaluatorWeights {
    pub utility: f64,
    pub cost: f64,
    pub risk: f64,
    pub confidence: f64,
}

impl Default for EvaluatorWeights {
    fn default() -> Self {
        Self {
            utility: 4.0,
            cost: 1.0,
            risk: 10.0,
            confidence: 2.0,
        }
    }
}

/// Weights of the feedback-augmented score and the window bound.
///
/// The violation weight must dominate any achievable base score so that a
/// single recorded violation reliably drives the composite negative.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackWeights {
    /// Bonus per unit of historical success rate.
    pub success: f64,
    /// Penalty per mean recorded violation.
    pub violation: f64,
    /// Penalty per mean millisecond of latency.
    pub latency: f64,
    /// Outcomes retained per `(task, language)` pair.
    pub window: usize,
}

impl Default for FeedbackWeights {
    fn default() -> Self {
        Self {
            success: 2.0,
            violation: 25.0,
            latency: 0.0005,
            window: 50,
        }
    }
}

/// One observed execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub latency_ms: u64,
    pub violations: u32,
}

/// Maps options and plans to scalar preferences.
pub struct Evaluator {
    weights: EvaluatorWeights,
    feedback_weights: FeedbackWeights,
    feedback: RwLock<HashMap<(String, String), VecDeque<Outcome>>>,
}

impl Evaluator {
    /// Evaluator with default weights.
    pub fn new() -> Self {
        Self::with_weights(EvaluatorWeights::default(), FeedbackWeights::default())
    }

    /// Evaluator with explicit weights.
    pub fn with_weights(weights: EvaluatorWeights, feedback_weights: FeedbackWeights) -> Self {
        Self {
            weights,
            feedback_weights,
            feedback: RwLock::new(HashMap::new()),
        }
    }

    /// Base preference for a `(task_name, language)` option.
    pub fn score_option(&self, task_name: Option<&str>, language: &str) -> f64 {
        let mut score = language_preference(language);
        if task_name.is_some_and(|name| !name.is_empty()) {
            score += 0.5;
        }
        score
    }

    /// Preference score of a flat plan.
    pub fn plan_score(&self, plan: &Plan) -> f64 {
        let w = &self.weights;
        w.utility * plan.estimated_utility - w.cost * plan.total_cost()
            - w.risk * plan.principles_risk
            + w.confidence * plan.mean_confidence()
    }

    /// Append an observed outcome to the rolling window for a pair.
    pub fn record_outcome(&self, task_name: &str, language: &str, outcome: Outcome) {
        let mut feedback = self.feedback.write().unwrap_or_else(|e| e.into_inner());
        let window = feedback
            .entry((task_name.to_string(), language.to_string()))
            .or_default();
        window.push_back(outcome);
        while window.len() > self.feedback_weights.window {
            window.pop_front();
        }
    }

    /// Base option score plus the history-derived bonus and penalties.
    ///
    /// With no recorded history this equals [`score_option`](Self::score_option).
    pub fn feedback_score(&self, task_name: Option<&str>, language: &str) -> f64 {
        let base = self.score_option(task_name, language);
        let feedback = self.feedback.read().unwrap_or_else(|e| e.into_inner());
        let Some(window) = task_name
            .and_then(|name| feedback.get(&(name.to_string(), language.to_string())))
            .filter(|w| !w.is_empty())
        else {
            return base;
        };

        let n = window.len() as f64;
        let success_rate = window.iter().filter(|o| o.success).count() as f64 / n;
        let mean_violations = window.iter().map(|o| o.violations as f64).sum::<f64>() / n;
        let mean_latency = window.iter().map(|o| o.latency_ms as f64).sum::<f64>() / n;

        let w = &self.feedback_weights;
        base + w.success * success_rate - w.violation * mean_violations - w.latency * mean_latency
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn language_preference(language: &str) -> f64 {
    match language.to_lowercase().as_str() {
        "python" => 1.0,
        "go" => 0.8,
        "javascript" => 0.6,
        "bash" => 0.4,
        _ => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use synapse_kernel::capability::Goal;
    use synapse_kernel::plan::PlanStep;

    fn outcome(success: bool, latency_ms: u64, violations: u32) -> Outcome {
        Outcome {
            success,
            latency_ms,
            violations,
        }
    }

    #[test]
    fn option_score_combines_language_and_task_presence() {
        let ev = Evaluator::new();
        assert_eq!(ev.score_option(Some("gen"), "python"), 1.5);
        assert_eq!(ev.score_option(Some("gen"), "go"), 1.3);
        assert_eq!(ev.score_option(None, "javascript"), 0.6);
        assert_eq!(ev.score_option(Some(""), "bash"), 0.4);
        assert_eq!(ev.score_option(None, "cobol"), 0.2);
    }

    #[test]
    fn plan_score_follows_the_weighted_formula() {
        let ev = Evaluator::new();
        let plan = Plan {
            id: "p".into(),
            goal: Goal::new("g"),
            steps: vec![PlanStep {
                capability_id: "c".into(),
                args: HashMap::new(),
                estimated_cost: 1.0,
                confidence: 0.9,
            }],
            estimated_utility: 0.8,
            principles_risk: 0.1,
            score: 0.0,
        };
        // 4*0.8 - 1*1.0 - 10*0.1 + 2*0.9 = 3.0
        assert!((ev.plan_score(&plan) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn feedback_score_equals_base_without_history() {
        let ev = Evaluator::new();
        assert_eq!(
            ev.feedback_score(Some("gen"), "python"),
            ev.score_option(Some("gen"), "python")
        );
    }

    #[test]
    fn more_successes_raise_the_score() {
        let ev = Evaluator::new();
        ev.record_outcome("gen", "python", outcome(false, 100, 0));
        let low = ev.feedback_score(Some("gen"), "python");
        ev.record_outcome("gen", "python", outcome(true, 100, 0));
        ev.record_outcome("gen", "python", outcome(true, 100, 0));
        let high = ev.feedback_score(Some("gen"), "python");
        assert!(high > low);
    }

    #[test]
    fn one_violation_drives_the_composite_negative() {
        let ev = Evaluator::new();
        // Best possible base: python + named task, and a success on record.
        ev.record_outcome("gen", "python", outcome(true, 0, 1));
        assert!(ev.feedback_score(Some("gen"), "python") < 0.0);
    }

    #[test]
    fn violations_strictly_lower_the_score() {
        let ev = Evaluator::new();
        ev.record_outcome("gen", "go", outcome(true, 50, 0));
        let clean = ev.feedback_score(Some("gen"), "go");
        ev.record_outcome("gen", "go", outcome(true, 50, 2));
        let tainted = ev.feedback_score(Some("gen"), "go");
        assert!(tainted < clean);
    }

    #[test]
    fn lower_latency_never_lowers_the_score() {
        let fast = Evaluator::new();
        fast.record_outcome("gen", "go", outcome(true, 10, 0));
        let slow = Evaluator::new();
        slow.record_outcome("gen", "go", outcome(true, 10_000, 0));
        assert!(
            fast.feedback_score(Some("gen"), "go") >= slow.feedback_score(Some("gen"), "go")
        );
    }

    #[test]
    fn window_is_bounded() {
        let ev = Evaluator::with_weights(
            EvaluatorWeights::default(),
            FeedbackWeights {
                window: 3,
                ..FeedbackWeights::default()
            },
        );
        // Three failures pushed out by three successes: rate becomes 1.0.
        for _ in 0..3 {
            ev.record_outcome("gen", "go", outcome(false, 0, 0));
        }
        for _ in 0..3 {
            ev.record_outcome("gen", "go", outcome(true, 0, 0));
        }
        let score = ev.feedback_score(Some("gen"), "go");
        let expected = ev.score_option(Some("gen"), "go") + FeedbackWeights::default().success;
        assert!((score - expected).abs() < 1e-9);
    }
}
