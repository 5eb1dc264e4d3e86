//! SQLite implementation of the SimilarityStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskSimilarityEntry;
use crate::domain::ports::SimilarityStore;

#[derive(Clone)]
pub struct SqliteSimilarityStore {
    pool: SqlitePool,
}

impl SqliteSimilarityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SimilarityStore for SqliteSimilarityStore {
    async fn upsert(&self, entry: &TaskSimilarityEntry) -> DomainResult<()> {
        // Re-canonicalize so hand-built entries land on the same row.
        let entry = TaskSimilarityEntry::new(
            entry.task_a.clone(),
            entry.task_b.clone(),
            entry.similarity,
        );
        sqlx::query(
            r#"INSERT INTO task_similarity (task_a, task_b, similarity, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(task_a, task_b) DO UPDATE SET
                   similarity = excluded.similarity,
                   updated_at = excluded.updated_at"#,
        )
        .bind(entry.task_a.as_str())
        .bind(entry.task_b.as_str())
        .bind(entry.similarity)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<TaskSimilarityEntry>> {
        let rows: Vec<(String, String, f64)> = sqlx::query_as(
            "SELECT task_a, task_b, similarity FROM task_similarity ORDER BY task_a, task_b",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(a, b, s)| TaskSimilarityEntry::new(a.as_str().into(), b.as_str().into(), s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_upsert_overwrites_symmetric_pair() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteSimilarityStore::new(pool);

        store
            .upsert(&TaskSimilarityEntry::new("testing".into(), "bug_fix".into(), 0.4))
            .await
            .unwrap();
        store
            .upsert(&TaskSimilarityEntry::new("bug_fix".into(), "testing".into(), 0.7))
            .await
            .unwrap();

        let entries = store.load_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_a.as_str(), "bug_fix");
        assert!((entries[0].similarity - 0.7).abs() < 1e-12);
    }
}
