//! Reusable parameterised workflow skeletons.

use super::step::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named workflow skeleton whose steps carry `${param}` placeholders,
/// bound from goal params at instantiation. Registered, listed, loaded;
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Template identifier, matched against goal types and hints.
    pub id: String,

    /// Display name.
    pub name: String,

    /// What instantiations of this template do.
    #[serde(default)]
    pub description: String,

    /// Declared parameter names. Every `${name}` referenced in the steps
    /// must appear here; registration validates this.
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Skeleton steps with placeholders in their args.
    pub steps: Vec<WorkflowStep>,

    pub created_at: DateTime<Utc>,

    /// Stamped on every registration.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Create an empty template.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter name.
    pub fn with_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }

    /// Append a skeleton step.
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }
}
