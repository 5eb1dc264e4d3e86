use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::LinearModelSnapshot;

/// Durable storage for contextual bandit arms.
#[async_trait]
pub trait LinearModelStore: Send + Sync {
    async fn save(&self, snapshot: &LinearModelSnapshot) -> DomainResult<()>;

    async fn load_all(&self) -> DomainResult<Vec<LinearModelSnapshot>>;

    /// Drop every stored arm, used when the feature layout changes.
    async fn clear(&self) -> DomainResult<()>;
}
