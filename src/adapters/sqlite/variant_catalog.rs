//! SQLite implementation of the VariantCatalog.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{parse_datetime, parse_json_or_default};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Variant, VariantOrigin, VariantStatus};
use crate::domain::ports::VariantCatalog;

#[derive(Clone)]
pub struct SqliteVariantCatalog {
    pool: SqlitePool,
}

impl SqliteVariantCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VariantCatalog for SqliteVariantCatalog {
    async fn upsert(&self, variant: &Variant) -> DomainResult<()> {
        let delta_json = serde_json::to_string(&variant.configuration_delta)?;
        let performance_json = serde_json::to_string(&variant.performance)?;
        let parents_json = serde_json::to_string(&variant.parents)?;

        sqlx::query(
            r#"INSERT INTO variants (agent_name, variant_id, configuration_delta, performance,
               parents, origin, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(agent_name, variant_id) DO UPDATE SET
                   configuration_delta = excluded.configuration_delta,
                   performance = excluded.performance,
                   parents = excluded.parents,
                   origin = excluded.origin,
                   status = excluded.status,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&variant.agent_name)
        .bind(variant.variant_id.as_str())
        .bind(&delta_json)
        .bind(&performance_json)
        .bind(&parents_json)
        .bind(variant.origin.as_str())
        .bind(variant.status.as_str())
        .bind(variant.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_all(&self) -> DomainResult<Vec<Variant>> {
        let rows: Vec<VariantRow> = sqlx::query_as(
            "SELECT agent_name, variant_id, configuration_delta, performance, parents, origin, status, created_at
             FROM variants ORDER BY agent_name, variant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Variant::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    agent_name: String,
    variant_id: String,
    configuration_delta: Option<String>,
    performance: Option<String>,
    parents: Option<String>,
    origin: String,
    status: String,
    created_at: String,
}

fn parse_origin(s: &str) -> DomainResult<VariantOrigin> {
    match s {
        "authored" => Ok(VariantOrigin::Authored),
        "mutation" => Ok(VariantOrigin::Mutation),
        "crossover" => Ok(VariantOrigin::Crossover),
        other => Err(DomainError::SerializationError(format!(
            "unknown variant origin '{other}'"
        ))),
    }
}

fn parse_status(s: &str) -> DomainResult<VariantStatus> {
    match s {
        "active" => Ok(VariantStatus::Active),
        "retired" => Ok(VariantStatus::Retired),
        other => Err(DomainError::SerializationError(format!(
            "unknown variant status '{other}'"
        ))),
    }
}

impl TryFrom<VariantRow> for Variant {
    type Error = DomainError;

    fn try_from(row: VariantRow) -> Result<Self, Self::Error> {
        Ok(Variant {
            variant_id: row.variant_id.into(),
            agent_name: row.agent_name,
            configuration_delta: parse_json_or_default(row.configuration_delta)?,
            performance: parse_json_or_default(row.performance)?,
            parents: parse_json_or_default(row.parents)?,
            origin: parse_origin(&row.origin)?,
            status: parse_status(&row.status)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{ConfigurationDelta, ModelTier};

    #[tokio::test]
    async fn test_upsert_round_trips_lineage_and_performance() {
        let pool = create_migrated_test_pool().await.unwrap();
        let catalog = SqliteVariantCatalog::new(pool);

        let mut child = Variant::derived(
            "A",
            "base-1a2b".into(),
            ConfigurationDelta::default()
                .with_parameter("temperature", 0.4)
                .with_model_tier(ModelTier::Heavy),
            vec!["base".into()],
            VariantOrigin::Mutation,
        );
        child.performance.record(&"x".into(), 0.5);
        catalog.upsert(&child).await.unwrap();

        child.status = VariantStatus::Retired;
        catalog.upsert(&child).await.unwrap();

        let loaded = catalog.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let stored = &loaded[0];
        assert_eq!(stored.parents, child.parents);
        assert_eq!(stored.configuration_delta, child.configuration_delta);
        assert_eq!(stored.performance, child.performance);
        assert_eq!(stored.status, VariantStatus::Retired);
        assert_eq!(stored.origin, VariantOrigin::Mutation);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(parse_status("paused").is_err());
        assert!(parse_origin("imported").is_err());
    }
}
