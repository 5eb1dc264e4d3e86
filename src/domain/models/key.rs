//! Identity types for learnable decision cells.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a variant. Ordered so ties can be broken deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(String);

impl VariantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VariantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task-type label produced by the classifier.
///
/// Labels are plain strings so that deployments can extend the built-in set
/// through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const CODE_GENERATION: &'static str = "code_generation";
    pub const BUG_FIX: &'static str = "bug_fix";
    pub const REFACTORING: &'static str = "refactoring";
    pub const TESTING: &'static str = "testing";
    pub const DOCUMENTATION: &'static str = "documentation";
    pub const CODE_REVIEW: &'static str = "code_review";
    pub const ARCHITECTURE: &'static str = "architecture";
    pub const PERFORMANCE: &'static str = "performance";
    pub const SECURITY: &'static str = "security";
    pub const DEVOPS: &'static str = "devops";
    pub const GENERAL: &'static str = "general";

    /// Built-in labels, `general` last.
    pub const BUILTIN: [&'static str; 11] = [
        Self::CODE_GENERATION,
        Self::BUG_FIX,
        Self::REFACTORING,
        Self::TESTING,
        Self::DOCUMENTATION,
        Self::CODE_REVIEW,
        Self::ARCHITECTURE,
        Self::PERFORMANCE,
        Self::SECURITY,
        Self::DEVOPS,
        Self::GENERAL,
    ];

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn general() -> Self {
        Self(Self::GENERAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Composite identity `(agent_name, task_type, variant_id)` of one learnable cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateActionKey {
    agent_name: String,
    task_type: TaskType,
    variant_id: VariantId,
}

impl StateActionKey {
    pub fn new(
        agent_name: impl Into<String>,
        task_type: impl Into<TaskType>,
        variant_id: impl Into<VariantId>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_type: task_type.into(),
            variant_id: variant_id.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn variant_id(&self) -> &VariantId {
        &self.variant_id
    }

    /// The decision state this key belongs to.
    pub fn state(&self) -> DecisionState {
        DecisionState::new(self.agent_name.clone(), self.task_type.clone())
    }
}

impl fmt::Display for StateActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.agent_name, self.task_type, self.variant_id)
    }
}

/// The `(agent, task_type)` state over which a policy chooses a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionState {
    pub agent_name: String,
    pub task_type: TaskType,
}

impl DecisionState {
    pub fn new(agent_name: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_type: task_type.into(),
        }
    }

    pub fn key_for(&self, variant_id: &VariantId) -> StateActionKey {
        StateActionKey {
            agent_name: self.agent_name.clone(),
            task_type: self.task_type.clone(),
            variant_id: variant_id.clone(),
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_name, self.task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_groups_by_state() {
        let mut keys = vec![
            StateActionKey::new("b", "x", "v1"),
            StateActionKey::new("a", "y", "v0"),
            StateActionKey::new("a", "x", "v2"),
            StateActionKey::new("a", "x", "v1"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a/x/v1", "a/x/v2", "a/y/v0", "b/x/v1"]);
    }

    #[test]
    fn test_state_round_trips_key() {
        let key = StateActionKey::new("A", "x", "opt");
        let state = key.state();
        assert_eq!(state.key_for(&VariantId::from("opt")), key);
    }
}
