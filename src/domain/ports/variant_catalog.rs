use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Variant;

/// Durable catalog of variant definitions and their performance snapshots.
#[async_trait]
pub trait VariantCatalog: Send + Sync {
    /// Insert or replace a variant, including its current performance snapshot.
    async fn upsert(&self, variant: &Variant) -> DomainResult<()>;

    /// All variants, active and retired.
    async fn load_all(&self) -> DomainResult<Vec<Variant>>;
}
