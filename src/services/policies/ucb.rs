//! UCB1 over streaming mean rewards.

use std::sync::Arc;

use super::{ordered_candidates, streaming_mean, PolicyContext, SelectionPolicy};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    DecisionState, PolicyDecision, PolicyKind, StateActionKey, ValueEntry, VariantId,
};
use crate::services::value_store::ValueStore;

/// Deterministic upper-confidence-bound policy.
pub struct Ucb1Policy {
    store: Arc<ValueStore>,
    exploration: f64,
}

impl Ucb1Policy {
    pub fn new(store: Arc<ValueStore>, exploration: f64) -> Self {
        Self { store, exploration }
    }

    /// Upper bound for one arm; unvisited arms are unbounded.
    pub fn bound(&self, entry: &ValueEntry, total_visits: u64) -> f64 {
        if entry.visit_count == 0 {
            return f64::INFINITY;
        }
        let ln_total = (total_visits.max(1) as f64).ln();
        entry.value + self.exploration * (ln_total / entry.visit_count as f64).sqrt()
    }
}

impl SelectionPolicy for Ucb1Policy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Ucb1
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
        let total_visits: u64 = entries.iter().map(|e| e.visit_count).sum();

        let mut best = &entries[0];
        let mut best_bound = self.bound(best, total_visits);
        let mut best_mean = if best.visit_count > 0 { best.value } else { f64::NEG_INFINITY };
        for entry in &entries[1..] {
            let bound = self.bound(entry, total_visits);
            if bound > best_bound {
                best = entry;
                best_bound = bound;
            }
            if entry.visit_count > 0 && entry.value > best_mean {
                best_mean = entry.value;
            }
        }

        Ok(PolicyDecision {
            variant_id: best.key.variant_id().clone(),
            estimated_value: best.value,
            exploration: best.visit_count == 0 || best.value < best_mean,
            score: best_bound,
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

    fn ids(names: &[&str]) -> Vec<VariantId> {
        names.iter().map(|n| VariantId::from(*n)).collect()
    }

    #[test]
    fn test_unvisited_arm_is_tried_first() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = Ucb1Policy::new(Arc::clone(&store), std::f64::consts::SQRT_2);
        let state = DecisionState::new("A", "x");
        let ctx = PolicyContext::default();

        for _ in 0..20 {
            policy
                .update(&state.key_for(&"a".into()), 1.0, &ctx)
                .unwrap();
        }

        let decision = policy.select(&state, &ids(&["a", "b"]), &ctx).unwrap();
        assert_eq!(decision.variant_id.as_str(), "b");
        assert!(decision.score.is_infinite());
        assert!(decision.exploration);
    }

    #[test]
    fn test_streaming_mean_update() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = Ucb1Policy::new(Arc::clone(&store), 1.0);
        let key = StateActionKey::new("A", "x", "a");
        let ctx = PolicyContext::default();

        policy.update(&key, 1.0, &ctx).unwrap();
        policy.update(&key, 0.0, &ctx).unwrap();
        let entry = policy.update(&key, -0.4, &ctx).unwrap();
        assert!((entry.value - 0.2).abs() < 1e-12);
        assert_eq!(entry.visit_count, 3);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let store = Arc::new(ValueStore::in_memory());
        let policy = Ucb1Policy::new(Arc::clone(&store), 1.0);
        let state = DecisionState::new("A", "x");
        let ctx = PolicyContext::default();
        policy.update(&state.key_for(&"a".into()), 0.5, &ctx).unwrap();
        policy.update(&state.key_for(&"b".into()), 0.5, &ctx).unwrap();

        let first = policy.select(&state, &ids(&["b", "a"]), &ctx).unwrap();
        let second = policy.select(&state, &ids(&["a", "b"]), &ctx).unwrap();
        assert_eq!(first, second);
        // Equal bounds resolve to the lowest id.
        assert_eq!(first.variant_id.as_str(), "a");
    }
}
