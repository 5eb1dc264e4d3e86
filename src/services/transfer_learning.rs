//! Cross-task warm starts.
//!
//! A key that has never been visited can be seeded with the
//! similarity-weighted average of the same variant's values under related
//! task types. Similarity comes from a curated table over the built-in labels,
//! overridden by entries in the [`SimilarityStore`] (set by operators or
//! learned from value correlations).

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    DecisionState, StateActionKey, TaskSimilarityEntry, TaskType, TransferConfig, VariantId,
};
use crate::domain::ports::SimilarityStore;
use crate::services::value_store::ValueStore;

/// Similarity between `general` and any other label.
const GENERAL_SIMILARITY: f64 = 0.3;
/// Similarity between built-in labels without a curated entry.
const DEFAULT_BUILTIN_SIMILARITY: f64 = 0.1;
/// Minimum shared variants before a correlation is trusted.
const MIN_SHARED_VARIANTS: usize = 3;

const CURATED: &[(&str, &str, f64)] = &[
    (TaskType::BUG_FIX, TaskType::TESTING, 0.6),
    (TaskType::BUG_FIX, TaskType::REFACTORING, 0.5),
    (TaskType::BUG_FIX, TaskType::CODE_REVIEW, 0.4),
    (TaskType::BUG_FIX, TaskType::PERFORMANCE, 0.4),
    (TaskType::BUG_FIX, TaskType::SECURITY, 0.4),
    (TaskType::BUG_FIX, TaskType::CODE_GENERATION, 0.4),
    (TaskType::CODE_GENERATION, TaskType::REFACTORING, 0.6),
    (TaskType::CODE_GENERATION, TaskType::TESTING, 0.4),
    (TaskType::CODE_GENERATION, TaskType::ARCHITECTURE, 0.5),
    (TaskType::REFACTORING, TaskType::PERFORMANCE, 0.5),
    (TaskType::REFACTORING, TaskType::CODE_REVIEW, 0.5),
    (TaskType::REFACTORING, TaskType::ARCHITECTURE, 0.5),
    (TaskType::TESTING, TaskType::CODE_REVIEW, 0.4),
    (TaskType::DOCUMENTATION, TaskType::CODE_REVIEW, 0.3),
    (TaskType::DOCUMENTATION, TaskType::ARCHITECTURE, 0.4),
    (TaskType::ARCHITECTURE, TaskType::PERFORMANCE, 0.4),
    (TaskType::SECURITY, TaskType::CODE_REVIEW, 0.5),
    (TaskType::DEVOPS, TaskType::SECURITY, 0.3),
    (TaskType::DEVOPS, TaskType::PERFORMANCE, 0.3),
];

fn canonical(a: &TaskType, b: &TaskType) -> (TaskType, TaskType) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn curated_similarity(a: &TaskType, b: &TaskType) -> f64 {
    let is_builtin = |t: &TaskType| TaskType::BUILTIN.contains(&t.as_str());
    if !is_builtin(a) || !is_builtin(b) {
        return 0.0;
    }
    if a.as_str() == TaskType::GENERAL || b.as_str() == TaskType::GENERAL {
        return GENERAL_SIMILARITY;
    }
    CURATED
        .iter()
        .find(|(x, y, _)| {
            (*x == a.as_str() && *y == b.as_str()) || (*x == b.as_str() && *y == a.as_str())
        })
        .map_or(DEFAULT_BUILTIN_SIMILARITY, |(_, _, s)| *s)
}

/// Pearson correlation; `None` when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Warm-start engine over the shared value store.
pub struct TransferEngine {
    store: Arc<ValueStore>,
    similarity_store: Arc<dyn SimilarityStore>,
    overrides: RwLock<HashMap<(TaskType, TaskType), f64>>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        store: Arc<ValueStore>,
        similarity_store: Arc<dyn SimilarityStore>,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            similarity_store,
            overrides: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Pull persisted similarity entries into the override table.
    pub async fn load(&self) -> DomainResult<usize> {
        let entries = self.similarity_store.load_all().await?;
        let mut overrides = self.overrides.write();
        for entry in &entries {
            overrides.insert(
                canonical(&entry.task_a, &entry.task_b),
                entry.similarity,
            );
        }
        debug!(entries = entries.len(), "Similarity overrides loaded");
        Ok(entries.len())
    }

    /// Symmetric similarity in [0, 1]; 1 for identical labels.
    pub fn similarity(&self, a: &TaskType, b: &TaskType) -> f64 {
        if a == b {
            return 1.0;
        }
        if let Some(s) = self.overrides.read().get(&canonical(a, b)) {
            return *s;
        }
        curated_similarity(a, b)
    }

    /// Record and persist a similarity value.
    pub async fn set_similarity(
        &self,
        a: &TaskType,
        b: &TaskType,
        similarity: f64,
    ) -> DomainResult<TaskSimilarityEntry> {
        let entry = TaskSimilarityEntry::new(a.clone(), b.clone(), similarity);
        self.similarity_store.upsert(&entry).await?;
        self.overrides.write().insert(
            (entry.task_a.clone(), entry.task_b.clone()),
            entry.similarity,
        );
        Ok(entry)
    }

    /// Similarity-weighted average of donor values for `target`.
    ///
    /// Donors are the same agent and variant under other task types with
    /// enough visits and positive similarity. `None` without donors.
    pub fn warm_value(&self, target: &StateActionKey) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for entry in self.store.snapshot() {
            let key = &entry.key;
            if key.agent_name() != target.agent_name()
                || key.variant_id() != target.variant_id()
                || key.task_type() == target.task_type()
                || entry.visit_count < self.config.min_donor_visits
            {
                continue;
            }
            let sim = self.similarity(target.task_type(), key.task_type());
            if sim <= 0.0 {
                continue;
            }
            weighted += sim * entry.value;
            total += sim;
        }
        (total > 0.0).then(|| weighted / total)
    }

    /// Seed unseen candidates of a sparse state. Returns how many were seeded.
    pub fn warm_start(&self, state: &DecisionState, candidates: &[VariantId]) -> usize {
        if !self.config.enabled || self.store.state_visits(state) >= self.config.sparse_visit_threshold
        {
            return 0;
        }

        let mut seeded = 0;
        for variant in candidates {
            let key = state.key_for(variant);
            let current = self.store.get(&key);
            if !current.is_unseen() || current.value != 0.0 {
                continue;
            }
            if let Some(value) = self.warm_value(&key) {
                if self.store.seed(&key, value) {
                    debug!(key = %key, value, "Warm-started key from related task types");
                    seeded += 1;
                }
            }
        }
        seeded
    }

    /// Derive similarities from how an agent's variants rank across task
    /// types, persisting each learned pair.
    ///
    /// Only cells with at least `min_donor_visits` visits count; a pair needs
    /// a few shared variants and non-constant values on both sides.
    pub async fn learn_similarity(&self, agent_name: &str) -> DomainResult<Vec<TaskSimilarityEntry>> {
        let mut by_task: BTreeMap<TaskType, BTreeMap<VariantId, f64>> = BTreeMap::new();
        for entry in self.store.snapshot() {
            if entry.key.agent_name() != agent_name
                || entry.visit_count < self.config.min_donor_visits
            {
                continue;
            }
            by_task
                .entry(entry.key.task_type().clone())
                .or_default()
                .insert(entry.key.variant_id().clone(), entry.value);
        }

        let tasks: Vec<&TaskType> = by_task.keys().collect();
        let mut learned = Vec::new();
        for (i, a) in tasks.iter().enumerate() {
            for b in &tasks[i + 1..] {
                let (xs, ys): (Vec<f64>, Vec<f64>) = by_task[*a]
                    .iter()
                    .filter_map(|(variant, x)| by_task[*b].get(variant).map(|y| (*x, *y)))
                    .unzip();
                if xs.len() < MIN_SHARED_VARIANTS {
                    continue;
                }
                let Some(r) = pearson(&xs, &ys) else {
                    continue;
                };
                let entry = self.set_similarity(a, b, (r + 1.0) / 2.0).await?;
                learned.push(entry);
            }
        }

        info!(agent = %agent_name, pairs = learned.len(), "Learned task similarities");
        Ok(learned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::InMemorySimilarityStore;

    fn engine() -> (Arc<ValueStore>, Arc<InMemorySimilarityStore>, TransferEngine) {
        let store = Arc::new(ValueStore::in_memory());
        let sims = Arc::new(InMemorySimilarityStore::new());
        let engine = TransferEngine::new(Arc::clone(&store), sims.clone(), TransferConfig::default());
        (store, sims, engine)
    }

    fn visit(store: &ValueStore, key: &StateActionKey, value: f64, times: u64) {
        for _ in 0..times {
            store.update(key, value, true);
        }
    }

    #[test]
    fn test_similarity_is_symmetric_with_unit_self() {
        let (_, _, engine) = engine();
        let a = TaskType::from(TaskType::BUG_FIX);
        let b = TaskType::from(TaskType::TESTING);
        assert_eq!(engine.similarity(&a, &a), 1.0);
        assert_eq!(engine.similarity(&a, &b), engine.similarity(&b, &a));
        assert_eq!(engine.similarity(&a, &b), 0.6);
        assert_eq!(engine.similarity(&a, &TaskType::from("custom")), 0.0);
    }

    #[tokio::test]
    async fn test_single_full_similarity_donor_copies_value() {
        let (store, _, engine) = engine();
        engine
            .set_similarity(&"x".into(), &"y".into(), 1.0)
            .await
            .unwrap();
        visit(&store, &StateActionKey::new("A", "y", "v"), 0.42, 5);

        let warm = engine.warm_value(&StateActionKey::new("A", "x", "v")).unwrap();
        assert!((warm - 0.42).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_warm_value_is_weighted_average() {
        let (store, _, engine) = engine();
        engine.set_similarity(&"x".into(), &"y".into(), 0.8).await.unwrap();
        engine.set_similarity(&"x".into(), &"z".into(), 0.2).await.unwrap();
        visit(&store, &StateActionKey::new("A", "y", "v"), 1.0, 6);
        visit(&store, &StateActionKey::new("A", "z", "v"), -1.0, 6);
        // Too few visits to donate.
        visit(&store, &StateActionKey::new("A", "w", "v"), 5.0, 2);

        let warm = engine.warm_value(&StateActionKey::new("A", "x", "v")).unwrap();
        assert!((warm - (0.8 - 0.2)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_warm_start_seeds_only_sparse_unseen_keys() {
        let (store, _, engine) = engine();
        engine.set_similarity(&"x".into(), &"y".into(), 1.0).await.unwrap();
        visit(&store, &StateActionKey::new("A", "y", "a"), 0.7, 5);
        visit(&store, &StateActionKey::new("A", "y", "b"), 0.2, 5);

        let state = DecisionState::new("A", "x");
        let seeded = engine.warm_start(&state, &["a".into(), "b".into(), "c".into()]);
        assert_eq!(seeded, 2);
        let a = store.get(&state.key_for(&"a".into()));
        assert!((a.value - 0.7).abs() < 1e-12);
        assert_eq!(a.visit_count, 0);

        // Once the state has enough visits no further seeding happens.
        visit(&store, &state.key_for(&"a".into()), 0.1, 3);
        assert_eq!(engine.warm_start(&state, &["c".into()]), 0);
    }

    #[tokio::test]
    async fn test_learn_similarity_from_correlated_values() {
        let (store, sims, engine) = engine();
        for (variant, x, y) in [("a", 0.9, 0.8), ("b", 0.1, 0.2), ("c", -0.5, -0.4)] {
            visit(&store, &StateActionKey::new("A", "x", variant), x, 5);
            visit(&store, &StateActionKey::new("A", "y", variant), y, 5);
        }

        let learned = engine.learn_similarity("A").await.unwrap();
        assert_eq!(learned.len(), 1);
        assert!(learned[0].similarity > 0.95);
        assert_eq!(sims.load_all().await.unwrap().len(), 1);
        assert!(engine.similarity(&"x".into(), &"y".into()) > 0.95);
    }

    #[tokio::test]
    async fn test_load_applies_persisted_overrides() {
        let (_, sims, engine) = engine();
        sims.upsert(&TaskSimilarityEntry::new(
            TaskType::TESTING.into(),
            TaskType::BUG_FIX.into(),
            0.05,
        ))
        .await
        .unwrap();
        assert_eq!(engine.load().await.unwrap(), 1);
        assert_eq!(
            engine.similarity(&TaskType::BUG_FIX.into(), &TaskType::TESTING.into()),
            0.05
        );
    }

    #[test]
    fn test_pearson_edge_cases() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]).is_none());
        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }
}
