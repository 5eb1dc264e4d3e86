//! SQLite implementation of the ValueLog.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{StateActionKey, ValueRecord};
use crate::domain::ports::ValueLog;

#[derive(Clone)]
pub struct SqliteValueLog {
    pool: SqlitePool,
}

impl SqliteValueLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of records in the log.
    pub async fn count(&self) -> DomainResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM value_updates")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ValueLog for SqliteValueLog {
    async fn append(&self, records: &[ValueRecord]) -> DomainResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::StoreUnavailable(e.to_string()))?;

        for record in records {
            sqlx::query(
                r#"INSERT INTO value_updates (agent_name, task_type, variant_id, value,
                   visit_count, convergence_score, recorded_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(record.key.agent_name())
            .bind(record.key.task_type().as_str())
            .bind(record.key.variant_id().as_str())
            .bind(record.value)
            .bind(record.visit_count as i64)
            .bind(record.convergence_score)
            .bind(record.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| DomainError::StoreUnavailable(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::StoreUnavailable(e.to_string()))
    }

    async fn replay(&self) -> DomainResult<Vec<ValueRecord>> {
        let rows: Vec<ValueUpdateRow> = sqlx::query_as(
            "SELECT agent_name, task_type, variant_id, value, visit_count, convergence_score, recorded_at
             FROM value_updates ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ValueRecord::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ValueUpdateRow {
    agent_name: String,
    task_type: String,
    variant_id: String,
    value: f64,
    visit_count: i64,
    convergence_score: f64,
    recorded_at: String,
}

impl TryFrom<ValueUpdateRow> for ValueRecord {
    type Error = DomainError;

    fn try_from(row: ValueUpdateRow) -> Result<Self, Self::Error> {
        Ok(ValueRecord {
            key: StateActionKey::new(
                row.agent_name,
                row.task_type.as_str(),
                row.variant_id,
            ),
            value: row.value,
            visit_count: row.visit_count.max(0) as u64,
            convergence_score: row.convergence_score,
            recorded_at: parse_datetime(&row.recorded_at)?,
        })
    }
}
