//! Decision-cycle coordinator.
//!
//! The coordinator is the only surface the invocation pipeline talks to:
//! [`Coordinator::select`] picks a variant for a task and
//! [`Coordinator::report`] feeds the observed outcome back into every
//! learner. Neither ever returns an error to the caller; failures are logged
//! and the cycle degrades to the agent's default variant.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, CoordinatorConfig, DecisionState, LearningConfig, OutcomeRecord, PolicyKind,
    RawOutcome, SelectionResult, StateActionKey, TaskComplexity, TaskRequest, TaskType, VariantId,
};
use crate::domain::ports::{LinearModelStore, SimilarityStore};
use crate::services::policies::{
    build_policy, build_policy_of_kind, estimate_complexity, extract_features, streaming_mean,
    LinUcbPolicy, PolicyContext, SelectionPolicy,
};
use crate::services::reward_calculator::RewardCalculator;
use crate::services::safety_monitor::{SafetyEvent, SafetyMonitor, SafetyStatus};
use crate::services::task_classifier::TaskClassifier;
use crate::services::transfer_learning::TransferEngine;
use crate::services::value_store::ValueStore;
use crate::services::variant_repository::VariantRepository;

/// A selection awaiting its outcome.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    pub key: StateActionKey,
    pub context: PolicyContext,
    /// Policy that made the selection; it also receives the update.
    pub policy: PolicyKind,
    /// Estimated from the request, used when the outcome is a timeout.
    pub complexity: TaskComplexity,
    pub selected_at: DateTime<Utc>,
}

/// Operator view of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub policy: PolicyKind,
    pub pending_decisions: usize,
    pub value_entries: usize,
    pub variants: usize,
    pub safety: SafetyStatus,
}

/// Wires classifier, policies, reward, transfer and safety into one cycle.
pub struct Coordinator {
    config: CoordinatorConfig,
    learning: LearningConfig,
    store: Arc<ValueStore>,
    classifier: TaskClassifier,
    reward: RewardCalculator,
    repository: Arc<VariantRepository>,
    transfer: Arc<TransferEngine>,
    safety: Arc<SafetyMonitor>,
    linucb: Arc<LinUcbPolicy>,
    policy: RwLock<Arc<dyn SelectionPolicy>>,
    pending: Mutex<HashMap<Uuid, PendingDecision>>,
    linear_models: Option<Arc<dyn LinearModelStore>>,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        store: Arc<ValueStore>,
        repository: Arc<VariantRepository>,
        similarity: Arc<dyn SimilarityStore>,
    ) -> Self {
        let linucb = Arc::new(LinUcbPolicy::new(Arc::clone(&store), &config.learning));
        let policy = build_policy(&config.learning, Arc::clone(&store), &linucb);
        let transfer = Arc::new(TransferEngine::new(
            Arc::clone(&store),
            similarity,
            config.transfer.clone(),
        ));
        let safety = Arc::new(SafetyMonitor::new(config.safety.clone(), Arc::clone(&store)));

        Self {
            config: config.coordinator.clone(),
            learning: config.learning.clone(),
            store,
            classifier: TaskClassifier::new(&config.classifier),
            reward: RewardCalculator::new(config.reward.clone()),
            repository,
            transfer,
            safety,
            linucb,
            policy: RwLock::new(policy),
            pending: Mutex::new(HashMap::new()),
            linear_models: None,
        }
    }

    /// Persist LinUCB arms to `store` on [`Coordinator::persist_linear_models`].
    pub fn with_linear_models(mut self, store: Arc<dyn LinearModelStore>) -> Self {
        self.linear_models = Some(store);
        self
    }

    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<VariantRepository> {
        &self.repository
    }

    pub fn safety(&self) -> &Arc<SafetyMonitor> {
        &self.safety
    }

    pub fn transfer(&self) -> &Arc<TransferEngine> {
        &self.transfer
    }

    pub fn reward_calculator(&self) -> &RewardCalculator {
        &self.reward
    }

    pub fn classifier(&self) -> &TaskClassifier {
        &self.classifier
    }

    pub fn linucb(&self) -> &Arc<LinUcbPolicy> {
        &self.linucb
    }

    /// Load the variant catalog, similarity overrides and linear models.
    pub async fn restore(&self) -> DomainResult<()> {
        self.repository.load().await?;
        for variant in self.repository.list(None).await {
            if !variant.is_active() {
                self.safety
                    .mark_retired(&variant.agent_name, &variant.variant_id)
                    .await;
            }
        }

        self.transfer.load().await?;

        if let Some(models) = &self.linear_models {
            let snapshots = models.load_all().await?;
            let loaded = self.linucb.import(&snapshots);
            if loaded < snapshots.len() {
                info!(
                    loaded,
                    discarded = snapshots.len() - loaded,
                    "Some linear models were reset"
                );
            }
        }
        Ok(())
    }

    /// Write every LinUCB arm to the linear model store, if one is attached.
    pub async fn persist_linear_models(&self) -> DomainResult<usize> {
        let Some(models) = &self.linear_models else {
            return Ok(0);
        };
        let snapshots = self.linucb.export();
        for snapshot in &snapshots {
            models.save(snapshot).await?;
        }
        Ok(snapshots.len())
    }

    pub fn active_policy(&self) -> Arc<dyn SelectionPolicy> {
        Arc::clone(&self.policy.read())
    }

    /// Replace the active policy. Learned values are shared, so nothing is lost.
    pub fn swap_policy(&self, kind: PolicyKind) {
        let next = build_policy_of_kind(kind, &self.learning, Arc::clone(&self.store), &self.linucb);
        let previous = std::mem::replace(&mut *self.policy.write(), next);
        info!(from = %previous.kind().as_str(), to = %kind.as_str(), "Selection policy swapped");
    }

    /// Choose a variant for `request`.
    pub async fn select(&self, request: TaskRequest) -> SelectionResult {
        let agent_name = request.agent_name.clone();
        let classification = self
            .classifier
            .classify(&request.task_description, &request.file_hints);
        let task_type = classification.task_type;
        let state = DecisionState::new(agent_name.clone(), task_type.clone());
        let policy = self.active_policy();

        let default_id = match self.repository.ensure_default(&agent_name).await {
            Ok(id) => id,
            Err(err) => {
                warn!(agent = %agent_name, error = %err, "Could not ensure default variant");
                self.repository.default_variant_id(&agent_name).await
            }
        };

        let active = self.repository.active_ids(&agent_name).await;
        let candidates = self.safety.filter_candidates(&agent_name, &active).await;
        let context = PolicyContext::with_features(extract_features(&request));
        let complexity = TaskComplexity::from_estimate(estimate_complexity(
            &request.task_description,
            &request.file_hints,
        ));

        let (variant_id, estimated_value, exploration, fallback) = if candidates.is_empty() {
            warn!(agent = %agent_name, task_type = %task_type, "No selectable variants, using default");
            let value = self.value_of(&state, &default_id);
            (default_id, value, false, true)
        } else if let Some(target) = self.safety.rollback_target(&state, &candidates).await {
            debug!(agent = %agent_name, variant = %target, "Rollback pin active");
            let value = self.value_of(&state, &target);
            (target, value, false, true)
        } else {
            self.transfer.warm_start(&state, &candidates);
            match policy.select(&state, &candidates, &context) {
                Ok(decision) => {
                    match self
                        .safety
                        .check_selectable(&agent_name, &decision.variant_id)
                        .await
                    {
                        Ok(()) => (
                            decision.variant_id,
                            decision.estimated_value,
                            decision.exploration,
                            false,
                        ),
                        Err(err) => {
                            error!(agent = %agent_name, error = %err, "Policy returned an excluded variant");
                            self.fallback(&state, &default_id, &candidates)
                        }
                    }
                }
                Err(err) => {
                    warn!(agent = %agent_name, error = %err, "Policy selection failed, using default");
                    self.fallback(&state, &default_id, &candidates)
                }
            }
        };

        let invocation_id = Uuid::new_v4();
        self.track(
            invocation_id,
            PendingDecision {
                key: StateActionKey::new(agent_name.clone(), task_type.clone(), variant_id.clone()),
                context,
                policy: policy.kind(),
                complexity,
                selected_at: Utc::now(),
            },
        );

        info!(
            invocation_id = %invocation_id,
            agent = %agent_name,
            task_type = %task_type,
            variant = %variant_id,
            confidence = classification.confidence,
            estimated_value,
            exploration,
            fallback,
            policy = %policy.kind().as_str(),
            "Variant selected"
        );

        SelectionResult {
            invocation_id,
            variant_id,
            task_type,
            estimated_value,
            exploration,
            fallback,
            policy: policy.kind(),
        }
    }

    fn value_of(&self, state: &DecisionState, variant_id: &VariantId) -> f64 {
        self.store
            .get(&StateActionKey::new(
                state.agent_name.clone(),
                state.task_type.clone(),
                variant_id.clone(),
            ))
            .value
    }

    /// Default variant if selectable, otherwise the lowest candidate id.
    fn fallback(
        &self,
        state: &DecisionState,
        default_id: &VariantId,
        candidates: &[VariantId],
    ) -> (VariantId, f64, bool, bool) {
        let chosen = if candidates.contains(default_id) {
            default_id.clone()
        } else {
            candidates
                .iter()
                .min()
                .cloned()
                .unwrap_or_else(|| default_id.clone())
        };
        let value = self.value_of(state, &chosen);
        (chosen, value, false, true)
    }

    fn track(&self, invocation_id: Uuid, decision: PendingDecision) {
        let now = decision.selected_at;
        let mut pending = self.pending.lock();
        let cutoff = now - Duration::seconds(self.config.pending_ttl_secs.max(0));
        let before = pending.len();
        pending.retain(|_, p| p.selected_at >= cutoff);
        let expired = before - pending.len();
        if expired > 0 {
            debug!(expired, "Dropped unreported decisions past their TTL");
        }

        while pending.len() >= self.config.max_pending.max(1) {
            let oldest = pending
                .iter()
                .min_by_key(|(_, p)| p.selected_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    pending.remove(&id);
                }
                None => break,
            }
        }
        pending.insert(invocation_id, decision);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Report the outcome of a previous selection.
    pub async fn report(&self, invocation_id: Uuid, raw: RawOutcome) {
        let Some(decision) = self.take_pending(invocation_id) else {
            return;
        };
        match OutcomeRecord::from_raw(&raw) {
            Ok(outcome) => {
                self.apply_outcome(&decision.key, &decision.context, decision.policy, &outcome)
                    .await;
            }
            Err(err) => warn!(key = %decision.key, error = %err, "Discarding malformed outcome"),
        }
    }

    /// Report that a previous selection's execution timed out.
    ///
    /// The timeout is scored as a failed execution of the task complexity
    /// estimated at selection time.
    pub async fn report_timeout(&self, invocation_id: Uuid, duration_seconds: f64) {
        let Some(decision) = self.take_pending(invocation_id) else {
            return;
        };
        let outcome = OutcomeRecord::timeout(duration_seconds, decision.complexity);
        self.apply_outcome(&decision.key, &decision.context, decision.policy, &outcome)
            .await;
    }

    /// Report an outcome directly against a state-action key.
    ///
    /// Without a pending decision there is no context vector, so the
    /// contextual bandit only receives the value-store update.
    pub async fn report_for_key(&self, key: &StateActionKey, raw: RawOutcome) {
        match OutcomeRecord::from_raw(&raw) {
            Ok(outcome) => {
                let kind = self.active_policy().kind();
                self.apply_outcome(key, &PolicyContext::default(), kind, &outcome)
                    .await;
            }
            Err(err) => warn!(key = %key, error = %err, "Discarding malformed outcome"),
        }
    }

    /// Remove a pending decision, dropping it if it outlived its TTL.
    fn take_pending(&self, invocation_id: Uuid) -> Option<PendingDecision> {
        let decision = self.pending.lock().remove(&invocation_id);
        let Some(decision) = decision else {
            warn!(invocation_id = %invocation_id, "Outcome for unknown or expired invocation");
            return None;
        };
        let ttl = Duration::seconds(self.config.pending_ttl_secs.max(0));
        if Utc::now() - decision.selected_at > ttl {
            warn!(invocation_id = %invocation_id, "Outcome arrived after the decision expired");
            return None;
        }
        Some(decision)
    }

    /// The active policy if it is of `kind`, otherwise a fresh instance over
    /// the same shared state.
    fn policy_of_kind(&self, kind: PolicyKind) -> Arc<dyn SelectionPolicy> {
        let active = self.active_policy();
        if active.kind() == kind {
            active
        } else {
            build_policy_of_kind(kind, &self.learning, Arc::clone(&self.store), &self.linucb)
        }
    }

    async fn apply_outcome(
        &self,
        key: &StateActionKey,
        context: &PolicyContext,
        policy: PolicyKind,
        outcome: &OutcomeRecord,
    ) {
        if self
            .repository
            .get(key.agent_name(), key.variant_id())
            .await
            .is_none()
        {
            warn!(key = %key, "Outcome for unknown variant discarded");
            return;
        }

        let reward = self.reward.calculate(outcome);
        match self.policy_of_kind(policy).update(key, reward, context) {
            Ok(entry) => debug!(
                key = %key,
                reward,
                value = entry.value,
                visits = entry.visit_count,
                policy = %policy.as_str(),
                "Value updated"
            ),
            Err(DomainError::FeatureDimensionMismatch { .. }) => {
                self.store.update_with(key, |e| streaming_mean(e, reward));
                debug!(key = %key, reward, "Outcome without context, updated value only");
            }
            Err(err) => warn!(key = %key, error = %err, "Policy update failed"),
        }

        if let Err(err) = self
            .repository
            .record_outcome(key.agent_name(), key.variant_id(), key.task_type(), reward)
            .await
        {
            warn!(key = %key, error = %err, "Failed to record variant performance");
        }

        if let Some(event) = self.safety.observe(key, outcome, reward).await {
            self.handle_safety_event(event).await;
        }
    }

    async fn handle_safety_event(&self, event: SafetyEvent) {
        match event {
            SafetyEvent::Retired(approval) => {
                if let Err(err) = self.repository.retire(&approval).await {
                    error!(variant = %approval.variant_id(), error = %err, "Failed to retire variant");
                }
            }
            SafetyEvent::Quarantined {
                agent_name,
                variant_id,
                rollback_to,
            } => warn!(
                agent = %agent_name,
                variant = %variant_id,
                rollback_to = ?rollback_to.as_ref().map(VariantId::as_str),
                "Variant quarantined"
            ),
            SafetyEvent::BecameSuspect {
                agent_name,
                variant_id,
                reason,
            } => info!(agent = %agent_name, variant = %variant_id, %reason, "Variant suspect"),
            SafetyEvent::Cleared {
                agent_name,
                variant_id,
            } => info!(agent = %agent_name, variant = %variant_id, "Variant cleared"),
        }
    }

    /// Operator reinstatement of a quarantined variant.
    pub async fn reinstate(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<()> {
        self.repository.require(agent_name, variant_id).await?;
        self.safety.reinstate(agent_name, variant_id).await
    }

    /// Operator retirement. The monitor signs off before the catalog changes.
    pub async fn retire(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<()> {
        self.repository.require(agent_name, variant_id).await?;
        let approval = self.safety.approve_retirement(agent_name, variant_id).await?;
        self.repository.retire(&approval).await
    }

    /// Classify without selecting.
    pub fn classify(&self, request: &TaskRequest) -> TaskType {
        self.classifier
            .classify(&request.task_description, &request.file_hints)
            .task_type
    }

    pub async fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            policy: self.active_policy().kind(),
            pending_decisions: self.pending_count(),
            value_entries: self.store.len(),
            variants: self.repository.list(None).await.len(),
            safety: self.safety.status().await,
        }
    }

    /// Flush the value log and persist linear models.
    pub async fn shutdown(&self) -> DomainResult<()> {
        self.persist_linear_models().await?;
        self.store.flush().await
    }
}
