//! In-memory port implementations.
//!
//! Used for ephemeral runs and tests where durability is not needed but the
//! type system requires a port implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{LinearModelStore, SimilarityStore, ValueLog, VariantCatalog};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    LinearModelSnapshot, TaskSimilarityEntry, TaskType, ValueRecord, Variant, VariantId,
};

/// Value log held in memory. Can be switched into a failing mode to exercise
/// degraded-store handling.
#[derive(Debug, Default)]
pub struct InMemoryValueLog {
    records: Mutex<Vec<ValueRecord>>,
    failing: AtomicBool,
}

impl InMemoryValueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record sequence.
    pub fn with_records(records: Vec<ValueRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent append fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ValueLog for InMemoryValueLog {
    async fn append(&self, records: &[ValueRecord]) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::StoreUnavailable(
                "in-memory log set to fail".to_string(),
            ));
        }
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    async fn replay(&self) -> DomainResult<Vec<ValueRecord>> {
        Ok(self.records.lock().clone())
    }
}

/// Variant catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryVariantCatalog {
    variants: Mutex<BTreeMap<(String, VariantId), Variant>>,
}

impl InMemoryVariantCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VariantCatalog for InMemoryVariantCatalog {
    async fn upsert(&self, variant: &Variant) -> DomainResult<()> {
        self.variants.lock().insert(
            (variant.agent_name.clone(), variant.variant_id.clone()),
            variant.clone(),
        );
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<Variant>> {
        Ok(self.variants.lock().values().cloned().collect())
    }
}

/// Similarity table held in memory.
#[derive(Debug, Default)]
pub struct InMemorySimilarityStore {
    entries: Mutex<BTreeMap<(TaskType, TaskType), TaskSimilarityEntry>>,
}

impl InMemorySimilarityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimilarityStore for InMemorySimilarityStore {
    async fn upsert(&self, entry: &TaskSimilarityEntry) -> DomainResult<()> {
        self.entries.lock().insert(
            (entry.task_a.clone(), entry.task_b.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<TaskSimilarityEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }
}

/// Linear bandit arms held in memory.
#[derive(Debug, Default)]
pub struct InMemoryLinearModelStore {
    models: Mutex<BTreeMap<(String, VariantId), LinearModelSnapshot>>,
}

impl InMemoryLinearModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinearModelStore for InMemoryLinearModelStore {
    async fn save(&self, snapshot: &LinearModelSnapshot) -> DomainResult<()> {
        self.models.lock().insert(
            (snapshot.agent_name.clone(), snapshot.variant_id.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<LinearModelSnapshot>> {
        Ok(self.models.lock().values().cloned().collect())
    }

    async fn clear(&self) -> DomainResult<()> {
        self.models.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StateActionKey;
    use chrono::Utc;

    #[tokio::test]
    async fn test_failing_log_rejects_appends() {
        let log = InMemoryValueLog::new();
        let record = ValueRecord {
            key: StateActionKey::new("A", "x", "v"),
            value: 0.5,
            visit_count: 1,
            convergence_score: 0.5,
            recorded_at: Utc::now(),
        };

        log.append(std::slice::from_ref(&record)).await.unwrap();
        log.set_failing(true);
        assert!(matches!(
            log.append(&[record]).await,
            Err(DomainError::StoreUnavailable(_))
        ));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_upsert_replaces_pair() {
        let store = InMemorySimilarityStore::new();
        store
            .upsert(&TaskSimilarityEntry::new("a".into(), "b".into(), 0.2))
            .await
            .unwrap();
        store
            .upsert(&TaskSimilarityEntry::new("b".into(), "a".into(), 0.7))
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].similarity, 0.7);
    }
}
