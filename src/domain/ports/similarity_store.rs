use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskSimilarityEntry;

/// Durable table of task-type similarities used for warm starts.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn upsert(&self, entry: &TaskSimilarityEntry) -> DomainResult<()>;

    async fn load_all(&self) -> DomainResult<Vec<TaskSimilarityEntry>>;
}
