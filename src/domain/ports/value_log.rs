use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ValueRecord;

/// Append-only durable log of value updates.
///
/// Replaying the log must reconstruct the value store: records are applied
/// last-writer-wins per key, so replaying the same log twice is harmless.
#[async_trait]
pub trait ValueLog: Send + Sync {
    /// Append a batch of records. The batch is written atomically or not at all.
    async fn append(&self, records: &[ValueRecord]) -> DomainResult<()>;

    /// Every record ever appended, oldest first.
    async fn replay(&self) -> DomainResult<Vec<ValueRecord>>;
}
