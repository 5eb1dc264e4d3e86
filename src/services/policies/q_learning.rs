//! Tabular TD(0) with epsilon-greedy exploration.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::trace;

use super::{make_rng, ordered_candidates, PolicyContext, SelectionPolicy};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionState, PolicyDecision, PolicyKind, StateActionKey, ValueEntry, VariantId,
};
use crate::services::value_store::ValueStore;

/// Epsilon-greedy over stored values with a constant step size.
///
/// Greedy ties go to the arm with fewer visits, then to the lowest id.
pub struct QLearningPolicy {
    store: Arc<ValueStore>,
    epsilon: f64,
    alpha: f64,
    rng: Mutex<StdRng>,
}

impl QLearningPolicy {
    pub fn new(store: Arc<ValueStore>, epsilon: f64, alpha: f64, seed: Option<u64>) -> Self {
        Self {
            store,
            epsilon: epsilon.clamp(0.0, 1.0),
            alpha,
            rng: Mutex::new(make_rng(seed)),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// One TD(0) step toward `reward`.
    pub fn td_target(&self, current: f64, reward: f64) -> f64 {
        current + self.alpha * (reward - current)
    }

    fn greedy(entries: &[ValueEntry]) -> Option<&ValueEntry> {
        let mut best: Option<&ValueEntry> = None;
        for entry in entries {
            let better = match best {
                None => true,
                Some(b) => {
                    entry.value > b.value
                        || (entry.value == b.value && entry.visit_count < b.visit_count)
                }
            };
            if better {
                best = Some(entry);
            }
        }
        best
    }
}

impl SelectionPolicy for QLearningPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::QLearning
    }

    fn select(
        &self,
        state: &DecisionState,
        candidates: &[VariantId],
        _context: &PolicyContext,
    ) -> DomainResult<PolicyDecision> {
        let ordered = ordered_candidates(candidates)?;
        let entries: Vec<ValueEntry> = ordered
            .iter()
            .map(|v| self.store.get(&state.key_for(v)))
            .collect();

        let explore = self.epsilon > 0.0 && self.rng.lock().random::<f64>() < self.epsilon;
        let chosen = if explore {
            let mut rng = self.rng.lock();
            entries.choose(&mut *rng)
        } else {
            Self::greedy(&entries)
        }
        .ok_or_else(|| DomainError::ValidationFailed("candidate set is empty".to_string()))?;

        trace!(state = %state, variant = %chosen.key.variant_id(), explore, "q-learning select");
        Ok(PolicyDecision {
            variant_id: chosen.key.variant_id().clone(),
            estimated_value: chosen.value,
            exploration: explore,
            score: chosen.value,
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
            .update_with(key, |entry| self.td_target(entry.value, reward)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(epsilon: f64) -> (Arc<ValueStore>, QLearningPolicy) {
        let store = Arc::new(ValueStore::in_memory());
        let policy = QLearningPolicy::new(Arc::clone(&store), epsilon, 0.1, Some(7));
        (store, policy)
    }

    fn ids(names: &[&str]) -> Vec<VariantId> {
        names.iter().map(|n| VariantId::from(*n)).collect()
    }

    #[test]
    fn test_td_update_is_exact() {
        let (store, policy) = setup(0.0);
        let key = StateActionKey::new("A", "x", "v");
        store.update(&key, 0.4, true);

        let entry = policy.update(&key, 1.0, &PolicyContext::default()).unwrap();
        assert_eq!(entry.value, 0.4 + 0.1 * (1.0 - 0.4));
        assert_eq!(entry.visit_count, 2);
    }

    #[test]
    fn test_greedy_picks_highest_value() {
        let (store, policy) = setup(0.0);
        let state = DecisionState::new("A", "x");
        store.update(&state.key_for(&"b".into()), 0.3, true);
        store.update(&state.key_for(&"c".into()), 0.9, true);

        let decision = policy
            .select(&state, &ids(&["a", "b", "c"]), &PolicyContext::default())
            .unwrap();
        assert_eq!(decision.variant_id.as_str(), "c");
        assert!(!decision.exploration);
        assert_eq!(decision.estimated_value, 0.9);
    }

    #[test]
    fn test_ties_prefer_fewer_visits_then_lowest_id() {
        let (store, policy) = setup(0.0);
        let state = DecisionState::new("A", "x");
        // "a" visited with value 0, "b" and "c" unseen at 0.
        store.update(&state.key_for(&"a".into()), 0.0, true);

        let decision = policy
            .select(&state, &ids(&["c", "a", "b"]), &PolicyContext::default())
            .unwrap();
        assert_eq!(decision.variant_id.as_str(), "b");
    }

    #[test]
    fn test_full_exploration_still_returns_a_candidate() {
        let (_store, policy) = setup(1.0);
        let state = DecisionState::new("A", "x");
        let candidates = ids(&["a", "b", "c"]);
        for _ in 0..50 {
            let decision = policy
                .select(&state, &candidates, &PolicyContext::default())
                .unwrap();
            assert!(decision.exploration);
            assert!(candidates.contains(&decision.variant_id));
        }
    }
}
