//! Beta-Bernoulli Thompson sampling.
//!
//! Rewards in [-1, 1] map to a success parameter `p = (r + 1) / 2`; each
//! observation adds `p` to alpha and `1 - p` to beta. The posterior is
//! reconstructed from the shared value cell (streaming mean `m`, visits `n`):
//! `alpha = 1 + n (m + 1) / 2` and `beta = 1 + n (1 - (m + 1) / 2)`.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution};
use std::sync::Arc;

use super::{make_rng, ordered_candidates, streaming_mean, PolicyContext, SelectionPolicy};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionState, PolicyDecision, PolicyKind, StateActionKey, ValueEntry, VariantId,
};
use crate::services::value_store::ValueStore;

/// Posterior parameters of one arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn from_entry(entry: &ValueEntry) -> Self {
        let n = entry.visit_count as f64;
        let p = ((entry.value + 1.0) / 2.0).clamp(0.0, 1.0);
        Self {
            alpha: 1.0 + n * p,
            beta: 1.0 + n * (1.0 - p),
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

pub struct ThompsonPolicy {
    store: Arc<ValueStore>,
    rng: Mutex<StdRng>,
}

impl ThompsonPolicy {
    pub fn new(store: Arc<ValueStore>, seed: Option<u64>) -> Self {
        Self {
            store,
            rng: Mutex::new(make_rng(seed)),
        }
    }

    pub fn posterior(&self, key: &StateActionKey) -> BetaPosterior {
        BetaPosterior::from_entry(&self.store.get(key))
    }
}

impl SelectionPolicy for ThompsonPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Thompson
    }

    fn select(
        &self,
        state: &DecisionState,
        candidates: &[VariantId],
        _context: &PolicyContext,
    ) -> DomainResult<PolicyDecision> {
        let ordered = ordered_candidates(candidates)?;
        let mut rng = self.rng.lock();

        let mut best: Option<(ValueEntry, f64)> = None;
        let mut best_mean = f64::NEG_INFINITY;
        let mut chosen_mean = f64::NEG_INFINITY;
        for variant in &ordered {
            let entry = self.store.get(&state.key_for(variant));
            let posterior = BetaPosterior::from_entry(&entry);
            let dist = Beta::new(posterior.alpha, posterior.beta).map_err(|e| {
                DomainError::ValidationFailed(format!("invalid posterior for {variant}: {e}"))
            })?;
            let draw = dist.sample(&mut *rng);
            let mean = posterior.mean();
            best_mean = best_mean.max(mean);

            if best.as_ref().is_none_or(|(_, d)| draw > *d) {
                chosen_mean = mean;
                best = Some((entry, draw));
            }
        }

        let (entry, draw) = best
            .ok_or_else(|| DomainError::ValidationFailed("candidate set is empty".to_string()))?;
        Ok(PolicyDecision {
            variant_id: entry.key.variant_id().clone(),
            estimated_value: entry.value,
            exploration: chosen_mean < best_mean,
            score: draw,
        })
    }

    fn update(
        &self,
        key: &StateActionKey,
        reward: f64,
        _context: &PolicyContext,
    ) -> DomainResult<ValueEntry> {
        Ok(self
            .store
            .update_with(key, |entry| streaming_mean(entry, reward)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_binary_rewards_shift_posterior_by_one() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = ThompsonPolicy::new(Arc::clone(&store), Some(1));
        let key = StateActionKey::new("A", "x", "a");
        let ctx = PolicyContext::default();

        assert_eq!(
            policy.posterior(&key),
            BetaPosterior {
                alpha: 1.0,
                beta: 1.0
            }
        );

        policy.update(&key, 1.0, &ctx).unwrap();
        let p = policy.posterior(&key);
        assert!((p.alpha - 2.0).abs() < 1e-12);
        assert!((p.beta - 1.0).abs() < 1e-12);

        policy.update(&key, -1.0, &ctx).unwrap();
        let p = policy.posterior(&key);
        assert!((p.alpha - 2.0).abs() < 1e-12);
        assert!((p.beta - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fractional_reward_splits_mass() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = ThompsonPolicy::new(Arc::clone(&store), Some(1));
        let key = StateActionKey::new("A", "x", "a");

        // r = 0.5 -> p = 0.75
        policy.update(&key, 0.5, &PolicyContext::default()).unwrap();
        let p = policy.posterior(&key);
        assert!((p.alpha - 1.75).abs() < 1e-12);
        assert!((p.beta - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_best_bernoulli_arm_dominates() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = ThompsonPolicy::new(Arc::clone(&store), Some(42));
        let state = DecisionState::new("A", "x");
        let ctx = PolicyContext::default();
        let candidates = vec![VariantId::from("good"), VariantId::from("poor")];
        let mut env = StdRng::seed_from_u64(99);

        let mut late_good = 0;
        for round in 0..2000 {
            let decision = policy.select(&state, &candidates, &ctx).unwrap();
            let p = if decision.variant_id.as_str() == "good" { 0.8 } else { 0.3 };
            let reward = if env.random_bool(p) { 1.0 } else { -1.0 };
            policy
                .update(&state.key_for(&decision.variant_id), reward, &ctx)
                .unwrap();
            if round >= 1500 && decision.variant_id.as_str() == "good" {
                late_good += 1;
            }
        }

        assert!(late_good > 450, "good arm chosen {late_good}/500 late rounds");
    }
}
