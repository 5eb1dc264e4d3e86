//! Variant definitions and their running performance statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::key::{TaskType, VariantId};

/// Model tier a variant runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Light,
    Standard,
    Heavy,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [Self::Light, Self::Standard, Self::Heavy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Heavy => "heavy",
        }
    }

    /// Neighbouring tiers, used by single-step tier mutations.
    pub fn neighbours(&self) -> Vec<ModelTier> {
        match self {
            Self::Light => vec![Self::Standard],
            Self::Standard => vec![Self::Light, Self::Heavy],
            Self::Heavy => vec![Self::Standard],
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "standard" => Ok(Self::Standard),
            "heavy" => Ok(Self::Heavy),
            other => Err(format!("Unknown model tier: '{other}'")),
        }
    }
}

/// Modification set applied on top of the base agent definition.
///
/// The learning core never interprets these values; only the mutator
/// perturbs them and the external executor applies them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDelta {
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub model_tier: Option<ModelTier>,
}

impl ConfigurationDelta {
    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_instruction(mut self, fragment: impl Into<String>) -> Self {
        self.instructions.push(fragment.into());
        self
    }

    pub fn with_model_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = Some(tier);
        self
    }
}

/// How a variant came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantOrigin {
    Authored,
    Mutation,
    Crossover,
}

impl VariantOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authored => "authored",
            Self::Mutation => "mutation",
            Self::Crossover => "crossover",
        }
    }
}

/// Catalog status. Retired variants keep their history but never run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    Active,
    Retired,
}

impl VariantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }
}

/// Incrementally averaged reward statistics for a variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub overall_mean_reward: f64,
    pub per_task_type_mean_reward: HashMap<TaskType, f64>,
    pub per_task_type_samples: HashMap<TaskType, u64>,
    pub sample_count: u64,
}

impl PerformanceMetrics {
    /// Fold one reward into the streaming means.
    pub fn record(&mut self, task_type: &TaskType, reward: f64) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        self.overall_mean_reward += (reward - self.overall_mean_reward) / n;

        let samples = self
            .per_task_type_samples
            .entry(task_type.clone())
            .or_insert(0);
        *samples += 1;
        let n_task = *samples as f64;
        let mean = self
            .per_task_type_mean_reward
            .entry(task_type.clone())
            .or_insert(0.0);
        *mean += (reward - *mean) / n_task;
    }

    pub fn mean_for(&self, task_type: &TaskType) -> Option<f64> {
        self.per_task_type_mean_reward.get(task_type).copied()
    }
}

/// One configurable behavior profile of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: VariantId,
    pub agent_name: String,
    pub configuration_delta: ConfigurationDelta,
    pub performance: PerformanceMetrics,
    /// Lineage edges; empty for authored variants.
    pub parents: Vec<VariantId>,
    pub origin: VariantOrigin,
    pub status: VariantStatus,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// A human-authored variant.
    pub fn authored(
        agent_name: impl Into<String>,
        variant_id: impl Into<VariantId>,
        configuration_delta: ConfigurationDelta,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            agent_name: agent_name.into(),
            configuration_delta,
            performance: PerformanceMetrics::default(),
            parents: Vec::new(),
            origin: VariantOrigin::Authored,
            status: VariantStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// A variant derived from existing ones.
    pub fn derived(
        agent_name: impl Into<String>,
        variant_id: VariantId,
        configuration_delta: ConfigurationDelta,
        parents: Vec<VariantId>,
        origin: VariantOrigin,
    ) -> Self {
        Self {
            variant_id,
            agent_name: agent_name.into(),
            configuration_delta,
            performance: PerformanceMetrics::default(),
            parents,
            origin,
            status: VariantStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VariantStatus::Active
    }
}
