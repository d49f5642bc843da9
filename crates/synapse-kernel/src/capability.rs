//! Capability and goal records.
//!
//! A [`Capability`] is a registered unit of work with a typed input
//! signature; a [`Goal`] is a typed request the planner resolves against
//! the registry. Capabilities are value records keyed by id — every
//! cross-reference in a plan is by id, never by pointer identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A registered unit of work, discoverable by task name or input signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Unique identifier. Empty on construction; the registry assigns one
    /// on first save.
    #[serde(default)]
    pub id: String,

    /// Human-readable task name matched against [`Goal::goal_type`].
    pub task_name: String,

    /// Where the capability's implementation lives (script path, function
    /// symbol, container image — executor-defined).
    #[serde(default)]
    pub entrypoint: String,

    /// Implementation language, used by the evaluator's preference table.
    #[serde(default)]
    pub language: String,

    /// Parameter name → type name. A goal matches when every key appears
    /// in its params.
    #[serde(default)]
    pub input_signature: HashMap<String, String>,

    /// Names of the outputs this capability produces.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// State flags that should hold before invocation.
    #[serde(default)]
    pub preconditions: Vec<String>,

    /// State flags this capability establishes.
    #[serde(default)]
    pub effects: Vec<String>,

    /// Static quality score assigned at registration.
    #[serde(default)]
    pub score: f64,

    /// Stamped by the registry on save.
    pub created_at: DateTime<Utc>,

    /// Stamped by the planner after a successful execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,

    /// Permission labels required to run this capability.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Capability {
    /// Create an unregistered capability for the given task name.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            task_name: task_name.into(),
            entrypoint: String::new(),
            language: String::new(),
            input_signature: HashMap::new(),
            outputs: Vec::new(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            score: 0.0,
            created_at: Utc::now(),
            last_used: None,
            permissions: Vec::new(),
        }
    }

    /// Set the entrypoint.
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    /// Set the implementation language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Declare an input parameter and its type.
    pub fn with_input(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.input_signature.insert(name.into(), type_name.into());
        self
    }

    /// Declare an output name.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Set the static quality score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Add a permission label.
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Returns `true` when this capability can serve the goal.
    ///
    /// A goal matches when either its type equals (or is contained
    /// case-insensitively in) `task_name`, or every declared input
    /// parameter is present in the goal's params. An empty signature never
    /// matches by signature alone — it would match every goal.
    pub fn matches_goal(&self, goal: &Goal) -> bool {
        if self.task_name == goal.goal_type {
            return true;
        }
        if !goal.goal_type.is_empty()
            && self
                .task_name
                .to_lowercase()
                .contains(&goal.goal_type.to_lowercase())
        {
            return true;
        }
        !self.input_signature.is_empty()
            && self
                .input_signature
                .keys()
                .all(|name| goal.params.contains_key(name))
    }
}

/// A typed request with parameters, one per planning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Request identifier (transient; one per planning request).
    #[serde(default)]
    pub id: String,

    /// Goal type matched against capability task names and template ids.
    #[serde(rename = "type")]
    pub goal_type: String,

    /// Named arguments for the matched capability or template.
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl Goal {
    /// Create a goal of the given type with a fresh id.
    pub fn new(goal_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal_type: goal_type.into(),
            params: HashMap::new(),
        }
    }

    /// Attach a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_by_exact_task_name() {
        let cap = Capability::new("PrimeGen");
        let goal = Goal::new("PrimeGen");
        assert!(cap.matches_goal(&goal));
    }

    #[test]
    fn matches_by_case_insensitive_containment() {
        let cap = Capability::new("PrimeGenFast");
        let goal = Goal::new("primegen");
        assert!(cap.matches_goal(&goal));
    }

    #[test]
    fn matches_by_input_signature_subset() {
        let cap = Capability::new("Other").with_input("count", "int");
        let goal = Goal::new("Unrelated").with_param("count", json!(10));
        assert!(cap.matches_goal(&goal));
    }

    #[test]
    fn empty_signature_does_not_match_by_signature() {
        let cap = Capability::new("Other");
        let goal = Goal::new("Unrelated").with_param("count", json!(10));
        assert!(!cap.matches_goal(&goal));
    }

    #[test]
    fn missing_signature_key_does_not_match() {
        let cap = Capability::new("Other")
            .with_input("count", "int")
            .with_input("seed", "int");
        let goal = Goal::new("Unrelated").with_param("count", json!(10));
        assert!(!cap.matches_goal(&goal));
    }

    #[test]
    fn goal_type_serializes_as_type() {
        let goal = Goal::new("PrimeGen");
        let value = serde_json::to_value(&goal).unwrap();
        assert_eq!(value["type"], "PrimeGen");
    }
}
