//! Variant catalog with running performance statistics and lineage.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConfigurationDelta, TaskType, Variant, VariantId, VariantStatus};
use crate::domain::ports::VariantCatalog;
use crate::services::safety_monitor::RetirementApproval;

/// Id of the variant created for every agent that has none configured.
pub const DEFAULT_VARIANT_ID: &str = "default";

type VariantKey = (String, VariantId);

/// Live variant repository backed by a [`VariantCatalog`].
pub struct VariantRepository {
    variants: RwLock<BTreeMap<VariantKey, Variant>>,
    defaults: RwLock<HashMap<String, VariantId>>,
    catalog: Arc<dyn VariantCatalog>,
}

impl VariantRepository {
    pub fn new(catalog: Arc<dyn VariantCatalog>) -> Self {
        Self {
            variants: RwLock::new(BTreeMap::new()),
            defaults: RwLock::new(HashMap::new()),
            catalog,
        }
    }

    /// Load every persisted variant.
    pub async fn load(&self) -> DomainResult<usize> {
        let loaded = self.catalog.load_all().await?;
        let count = loaded.len();
        let mut variants = self.variants.write().await;
        for variant in loaded {
            variants.insert(
                (variant.agent_name.clone(), variant.variant_id.clone()),
                variant,
            );
        }
        info!(variants = count, "Variant catalog loaded");
        Ok(count)
    }

    /// Insert or replace a variant and persist it.
    pub async fn register(&self, variant: Variant) -> DomainResult<()> {
        self.catalog.upsert(&variant).await?;
        debug!(agent = %variant.agent_name, variant = %variant.variant_id, "Variant registered");
        self.variants.write().await.insert(
            (variant.agent_name.clone(), variant.variant_id.clone()),
            variant,
        );
        Ok(())
    }

    /// Make sure the agent has a default variant, creating an empty one if needed.
    pub async fn ensure_default(&self, agent_name: &str) -> DomainResult<VariantId> {
        let default_id = self.default_variant_id(agent_name).await;
        if self.get(agent_name, &default_id).await.is_some() {
            return Ok(default_id);
        }
        let variant = Variant::authored(agent_name, default_id.clone(), ConfigurationDelta::default());
        if let Err(err) = self.register(variant.clone()).await {
            // Served from memory until the next successful upsert.
            warn!(agent = %agent_name, error = %err, "Failed to persist default variant");
            self.variants
                .write()
                .await
                .insert((agent_name.to_string(), default_id.clone()), variant);
        }
        Ok(default_id)
    }

    pub async fn set_default(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<()> {
        self.require(agent_name, variant_id).await?;
        self.defaults
            .write()
            .await
            .insert(agent_name.to_string(), variant_id.clone());
        Ok(())
    }

    pub async fn default_variant_id(&self, agent_name: &str) -> VariantId {
        self.defaults
            .read()
            .await
            .get(agent_name)
            .cloned()
            .unwrap_or_else(|| VariantId::from(DEFAULT_VARIANT_ID))
    }

    pub async fn get(&self, agent_name: &str, variant_id: &VariantId) -> Option<Variant> {
        self.variants
            .read()
            .await
            .get(&(agent_name.to_string(), variant_id.clone()))
            .cloned()
    }

    pub async fn require(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<Variant> {
        self.get(agent_name, variant_id)
            .await
            .ok_or_else(|| DomainError::UnknownVariant {
                agent_name: agent_name.to_string(),
                variant_id: variant_id.to_string(),
            })
    }

    /// Variants for one agent, or all of them.
    pub async fn list(&self, agent_name: Option<&str>) -> Vec<Variant> {
        self.variants
            .read()
            .await
            .values()
            .filter(|v| agent_name.is_none_or(|a| v.agent_name == a))
            .cloned()
            .collect()
    }

    /// Ids of an agent's active variants, ordered.
    pub async fn active_ids(&self, agent_name: &str) -> Vec<VariantId> {
        self.variants
            .read()
            .await
            .values()
            .filter(|v| v.agent_name == agent_name && v.is_active())
            .map(|v| v.variant_id.clone())
            .collect()
    }

    pub async fn agents(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .variants
            .read()
            .await
            .keys()
            .map(|(agent, _)| agent.clone())
            .collect();
        names.into_iter().collect()
    }

    /// Fold a reward into the variant's performance statistics.
    pub async fn record_outcome(
        &self,
        agent_name: &str,
        variant_id: &VariantId,
        task_type: &TaskType,
        reward: f64,
    ) -> DomainResult<()> {
        let updated = {
            let mut variants = self.variants.write().await;
            let variant = variants
                .get_mut(&(agent_name.to_string(), variant_id.clone()))
                .ok_or_else(|| DomainError::UnknownVariant {
                    agent_name: agent_name.to_string(),
                    variant_id: variant_id.to_string(),
                })?;
            variant.performance.record(task_type, reward);
            variant.clone()
        };
        self.catalog.upsert(&updated).await
    }

    /// Retire a variant. Requires a monitor-issued approval for the same variant.
    pub async fn retire(&self, approval: &RetirementApproval) -> DomainResult<()> {
        let updated = {
            let mut variants = self.variants.write().await;
            let variant = variants
                .get_mut(&(approval.agent_name().to_string(), approval.variant_id().clone()))
                .ok_or_else(|| DomainError::VariantNotFound(approval.variant_id().to_string()))?;
            if variant.status == VariantStatus::Retired {
                return Ok(());
            }
            variant.status = VariantStatus::Retired;
            variant.clone()
        };
        info!(agent = %updated.agent_name, variant = %updated.variant_id, "Variant retired");
        self.catalog.upsert(&updated).await
    }

    /// Ancestors of a variant, nearest first.
    pub async fn lineage(&self, agent_name: &str, variant_id: &VariantId) -> Vec<VariantId> {
        let variants = self.variants.read().await;
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<VariantId> = variants
            .get(&(agent_name.to_string(), variant_id.clone()))
            .map(|v| v.parents.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(parent) = variants.get(&(agent_name.to_string(), next.clone())) {
                queue.extend(parent.parents.iter().cloned());
            }
            order.push(next);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::VariantOrigin;
    use crate::domain::ports::InMemoryVariantCatalog;

    fn repo() -> (Arc<InMemoryVariantCatalog>, VariantRepository) {
        let catalog = Arc::new(InMemoryVariantCatalog::new());
        let repo = VariantRepository::new(catalog.clone());
        (catalog, repo)
    }

    #[tokio::test]
    async fn test_ensure_default_creates_once() {
        let (catalog, repo) = repo();
        let id = repo.ensure_default("A").await.unwrap();
        assert_eq!(id.as_str(), DEFAULT_VARIANT_ID);
        repo.ensure_default("A").await.unwrap();
        assert_eq!(catalog.load_all().await.unwrap().len(), 1);
        assert_eq!(repo.active_ids("A").await, vec![id]);
    }

    #[tokio::test]
    async fn test_unknown_variant_error() {
        let (_, repo) = repo();
        let err = repo.require("A", &"ghost".into()).await.unwrap_err();
        assert!(matches!(err, DomainError::UnknownVariant { .. }));
        assert!(repo
            .record_outcome("A", &"ghost".into(), &TaskType::general(), 1.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_record_outcome_updates_and_persists() {
        let (catalog, repo) = repo();
        repo.register(Variant::authored("A", "opt", ConfigurationDelta::default()))
            .await
            .unwrap();
        repo.record_outcome("A", &"opt".into(), &"x".into(), 0.5)
            .await
            .unwrap();
        repo.record_outcome("A", &"opt".into(), &"x".into(), 1.0)
            .await
            .unwrap();

        let stored = catalog.load_all().await.unwrap();
        assert_eq!(stored[0].performance.sample_count, 2);
        assert!((stored[0].performance.overall_mean_reward - 0.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_lineage_walks_parents() {
        let (_, repo) = repo();
        repo.register(Variant::authored("A", "root", ConfigurationDelta::default()))
            .await
            .unwrap();
        repo.register(Variant::derived(
            "A",
            "child".into(),
            ConfigurationDelta::default(),
            vec!["root".into()],
            VariantOrigin::Mutation,
        ))
        .await
        .unwrap();
        repo.register(Variant::derived(
            "A",
            "grandchild".into(),
            ConfigurationDelta::default(),
            vec!["child".into(), "root".into()],
            VariantOrigin::Crossover,
        ))
        .await
        .unwrap();

        let lineage = repo.lineage("A", &"grandchild".into()).await;
        assert_eq!(lineage, vec![VariantId::from("child"), VariantId::from("root")]);
    }

    #[tokio::test]
    async fn test_load_restores_catalog() {
        let catalog = Arc::new(InMemoryVariantCatalog::new());
        catalog
            .upsert(&Variant::authored("A", "v", ConfigurationDelta::default()))
            .await
            .unwrap();
        let repo = VariantRepository::new(catalog);
        assert_eq!(repo.load().await.unwrap(), 1);
        assert!(repo.get("A", &"v".into()).await.is_some());
        assert_eq!(repo.agents().await, vec!["A".to_string()]);
    }
}
