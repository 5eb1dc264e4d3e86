//! SQLite implementation of the LinearModelStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LinearModelSnapshot;
use crate::domain::ports::LinearModelStore;

#[derive(Clone)]
pub struct SqliteLinearModelStore {
    pool: SqlitePool,
}

impl SqliteLinearModelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinearModelStore for SqliteLinearModelStore {
    async fn save(&self, snapshot: &LinearModelSnapshot) -> DomainResult<()> {
        let a_json = serde_json::to_string(&snapshot.a)?;
        let b_json = serde_json::to_string(&snapshot.b)?;

        sqlx::query(
            r#"INSERT INTO linear_models (agent_name, variant_id, feature_version, dimension,
               a_matrix, b_vector, updates, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(agent_name, variant_id) DO UPDATE SET
                   feature_version = excluded.feature_version,
                   dimension = excluded.dimension,
                   a_matrix = excluded.a_matrix,
                   b_vector = excluded.b_vector,
                   updates = excluded.updates,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&snapshot.agent_name)
        .bind(snapshot.variant_id.as_str())
        .bind(i64::from(snapshot.feature_version))
        .bind(snapshot.dimension as i64)
        .bind(&a_json)
        .bind(&b_json)
        .bind(snapshot.updates as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<LinearModelSnapshot>> {
        let rows: Vec<LinearModelRow> = sqlx::query_as(
            "SELECT agent_name, variant_id, feature_version, dimension, a_matrix, b_vector, updates
             FROM linear_models ORDER BY agent_name, variant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LinearModelSnapshot::try_from).collect()
    }

    async fn clear(&self) -> DomainResult<()> {
        sqlx::query("DELETE FROM linear_models")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct LinearModelRow {
    agent_name: String,
    variant_id: String,
    feature_version: i64,
    dimension: i64,
    a_matrix: String,
    b_vector: String,
    updates: i64,
}

impl TryFrom<LinearModelRow> for LinearModelSnapshot {
    type Error = DomainError;

    fn try_from(row: LinearModelRow) -> Result<Self, Self::Error> {
        Ok(LinearModelSnapshot {
            agent_name: row.agent_name,
            variant_id: row.variant_id.into(),
            feature_version: u32::try_from(row.feature_version)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            dimension: usize::try_from(row.dimension)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            a: serde_json::from_str(&row.a_matrix)?,
            b: serde_json::from_str(&row.b_vector)?,
            updates: row.updates.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    fn snapshot(variant: &str) -> LinearModelSnapshot {
        LinearModelSnapshot {
            agent_name: "A".to_string(),
            variant_id: variant.into(),
            feature_version: 1,
            dimension: 2,
            a: vec![2.0, 0.5, 0.5, 1.0],
            b: vec![0.25, -1.0],
            updates: 3,
        }
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteLinearModelStore::new(pool);

        store.save(&snapshot("opt")).await.unwrap();
        let mut updated = snapshot("opt");
        updated.updates = 4;
        store.save(&updated).await.unwrap();
        store.save(&snapshot("alt")).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1], updated);

        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
