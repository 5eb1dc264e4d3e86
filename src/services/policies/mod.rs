//! Selection policies.
//!
//! Every policy implements [`SelectionPolicy`] over the shared
//! [`ValueStore`](crate::services::value_store::ValueStore). Candidates are
//! filtered by the caller before a policy sees them, so policies only rank.

pub mod features;
pub mod linucb;
pub mod q_learning;
pub mod thompson;
pub mod ucb;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionState, LearningConfig, PolicyDecision, PolicyKind, StateActionKey, ValueEntry,
    VariantId,
};
use crate::services::value_store::ValueStore;

pub use features::{extract_features, estimate_complexity, FEATURE_DIM, FEATURE_VERSION};
pub use linucb::LinUcbPolicy;
pub use q_learning::QLearningPolicy;
pub use thompson::ThompsonPolicy;
pub use ucb::Ucb1Policy;

/// Per-request information available to a policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    /// Context feature vector; only the contextual bandit reads it.
    pub features: Option<Vec<f64>>,
}

impl PolicyContext {
    pub fn with_features(features: Vec<f64>) -> Self {
        Self {
            features: Some(features),
        }
    }
}

/// Common contract of all selection policies.
pub trait SelectionPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Choose one of `candidates` for `state`.
    fn select(
        &self,
        state: &DecisionState,
        candidates: &[VariantId],
        context: &PolicyContext,
    ) -> DomainResult<PolicyDecision>;

    /// Fold an observed reward into the policy's estimates.
    fn update(
        &self,
        key: &StateActionKey,
        reward: f64,
        context: &PolicyContext,
    ) -> DomainResult<ValueEntry>;
}

/// Sorted, deduplicated candidate list; errors on an empty set.
pub(crate) fn ordered_candidates(candidates: &[VariantId]) -> DomainResult<Vec<VariantId>> {
    if candidates.is_empty() {
        return Err(DomainError::ValidationFailed(
            "candidate set is empty".to_string(),
        ));
    }
    let mut ordered = candidates.to_vec();
    ordered.sort();
    ordered.dedup();
    Ok(ordered)
}

/// Incremental mean after one more observation.
pub(crate) fn streaming_mean(entry: &ValueEntry, reward: f64) -> f64 {
    entry.value + (reward - entry.value) / (entry.visit_count + 1) as f64
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
}

/// Build the policy named by `config.policy`.
///
/// The contextual bandit is passed in because its arm state outlives policy
/// swaps.
pub fn build_policy(
    config: &LearningConfig,
    store: Arc<ValueStore>,
    linucb: &Arc<LinUcbPolicy>,
) -> Arc<dyn SelectionPolicy> {
    build_policy_of_kind(config.policy, config, store, linucb)
}

pub fn build_policy_of_kind(
    kind: PolicyKind,
    config: &LearningConfig,
    store: Arc<ValueStore>,
    linucb: &Arc<LinUcbPolicy>,
) -> Arc<dyn SelectionPolicy> {
    match kind {
        PolicyKind::QLearning => Arc::new(QLearningPolicy::new(
            store,
            config.epsilon,
            config.alpha,
            config.seed,
        )),
        PolicyKind::Ucb1 => Arc::new(Ucb1Policy::new(store, config.ucb_exploration)),
        PolicyKind::Thompson => Arc::new(ThompsonPolicy::new(store, config.seed)),
        PolicyKind::LinUcb => Arc::clone(linucb) as Arc<dyn SelectionPolicy>,
    }
}
