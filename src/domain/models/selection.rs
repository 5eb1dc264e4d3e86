//! Request and result types of a decision cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key::{TaskType, VariantId};

/// Which selection algorithm is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    QLearning,
    Ucb1,
    Thompson,
    LinUcb,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QLearning => "q_learning",
            Self::Ucb1 => "ucb1",
            Self::Thompson => "thompson",
            Self::LinUcb => "lin_ucb",
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "q_learning" | "qlearning" => Ok(Self::QLearning),
            "ucb1" | "ucb" => Ok(Self::Ucb1),
            "thompson" => Ok(Self::Thompson),
            "lin_ucb" | "linucb" => Ok(Self::LinUcb),
            other => Err(format!("Unknown policy: '{other}'")),
        }
    }
}

/// A task entering the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub agent_name: String,
    pub task_description: String,
    #[serde(default)]
    pub file_hints: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl TaskRequest {
    pub fn new(agent_name: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_description: task_description.into(),
            file_hints: Vec::new(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_file_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.requested_at = requested_at;
        self
    }
}

/// What a policy chose and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub variant_id: VariantId,
    /// The policy's estimate for the chosen arm at selection time.
    pub estimated_value: f64,
    pub exploration: bool,
    /// Policy-specific score (UCB bound, posterior draw, LinUCB score).
    pub score: f64,
}

/// Result returned to the caller of `select`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Identifies this cycle when the outcome is reported.
    pub invocation_id: Uuid,
    pub variant_id: VariantId,
    pub task_type: TaskType,
    pub estimated_value: f64,
    pub exploration: bool,
    /// True when the choice came from a default or rollback fallback
    /// rather than the active policy.
    pub fallback: bool,
    pub policy: PolicyKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_kind_parsing() {
        assert_eq!("q-learning".parse::<PolicyKind>().unwrap(), PolicyKind::QLearning);
        assert_eq!("LinUCB".parse::<PolicyKind>().unwrap(), PolicyKind::LinUcb);
        assert_eq!("ucb".parse::<PolicyKind>().unwrap(), PolicyKind::Ucb1);
        assert!("greedy".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_policy_kind_serde_names() {
        let json = serde_json::to_string(&PolicyKind::LinUcb).unwrap();
        assert_eq!(json, "\"lin_ucb\"");
    }
}
