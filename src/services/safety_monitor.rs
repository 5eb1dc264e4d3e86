//! Safety monitor and rollback manager.
//!
//! Tracks a health state machine per `(agent, variant)`:
//!
//! ```text
//! Healthy -> Suspect -> Quarantined -> Healthy (operator reinstate)
//!               |            \------> Retired (quarantine limit reached)
//!               \-> Healthy (regression cleared)
//! ```
//!
//! A confirmed regression always quarantines first; when that quarantine
//! reaches the limit the variant moves on to Retired within the same
//! observation. Operator retirement may start from any live state.
//!
//! A variant becomes suspect when a full rolling window's mean reward drops
//! below its historical baseline by more than the threshold, or when the
//! window's failure rate exceeds the ceiling. The baseline is the mean of
//! rewards that have aged out of the window. When a variant is quarantined the
//! affected state is pinned to its last known-good variant for a cooldown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionState, HealthState, OutcomeRecord, SafetyConfig, StateActionKey, StoreHealth,
    VariantId,
};
use crate::services::value_store::ValueStore;

/// Alerts kept for the status view.
const MAX_ALERTS: usize = 100;

type VariantKey = (String, VariantId);

/// Sign-off required to retire a variant.
///
/// Only [`SafetyMonitor`] can construct one, so every retirement passes
/// through the monitor's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetirementApproval {
    agent_name: String,
    variant_id: VariantId,
    issued_at: DateTime<Utc>,
}

impl RetirementApproval {
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn variant_id(&self) -> &VariantId {
        &self.variant_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Transition produced by one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvent {
    BecameSuspect {
        agent_name: String,
        variant_id: VariantId,
        reason: String,
    },
    Cleared {
        agent_name: String,
        variant_id: VariantId,
    },
    Quarantined {
        agent_name: String,
        variant_id: VariantId,
        rollback_to: Option<VariantId>,
    },
    /// The quarantine limit was reached; apply the approval to the repository.
    Retired(RetirementApproval),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub raised_at: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub variant_id: Option<VariantId>,
    pub message: String,
}

/// Operator view of one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantHealthView {
    pub agent_name: String,
    pub variant_id: VariantId,
    pub state: HealthState,
    pub window_mean: Option<f64>,
    pub baseline: Option<f64>,
    pub error_rate: Option<f64>,
    pub quarantine_count: u32,
    pub observations: u64,
    pub last_transition: DateTime<Utc>,
}

/// An active rollback pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPinView {
    pub agent_name: String,
    pub task_type: String,
    pub variant_id: VariantId,
    pub remaining: u32,
}

/// Operator status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub variants: Vec<VariantHealthView>,
    pub quarantine_events: u64,
    pub store: StoreHealth,
    pub rollback_pins: Vec<RollbackPinView>,
    pub alerts: Vec<SafetyAlert>,
}

#[derive(Debug, Clone)]
struct Observation {
    reward: f64,
    success: bool,
}

#[derive(Debug, Clone)]
struct VariantHealth {
    state: HealthState,
    window: VecDeque<Observation>,
    baseline_sum: f64,
    baseline_count: u64,
    consecutive_regressed: usize,
    quarantine_count: u32,
    observations: u64,
    last_transition: DateTime<Utc>,
}

impl VariantHealth {
    fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            window: VecDeque::new(),
            baseline_sum: 0.0,
            baseline_count: 0,
            consecutive_regressed: 0,
            quarantine_count: 0,
            observations: 0,
            last_transition: Utc::now(),
        }
    }

    fn window_mean(&self) -> Option<f64> {
        (!self.window.is_empty())
            .then(|| self.window.iter().map(|o| o.reward).sum::<f64>() / self.window.len() as f64)
    }

    fn error_rate(&self) -> Option<f64> {
        (!self.window.is_empty()).then(|| {
            self.window.iter().filter(|o| !o.success).count() as f64 / self.window.len() as f64
        })
    }

    fn baseline(&self) -> Option<f64> {
        (self.baseline_count > 0).then(|| self.baseline_sum / self.baseline_count as f64)
    }

    fn push(&mut self, observation: Observation, window_size: usize) {
        self.observations += 1;
        self.window.push_back(observation);
        while self.window.len() > window_size {
            if let Some(aged) = self.window.pop_front() {
                self.baseline_sum += aged.reward;
                self.baseline_count += 1;
            }
        }
    }

    /// Why the current window counts as regressed, if it does.
    fn regression(&self, config: &SafetyConfig) -> Option<String> {
        if self.window.len() < config.window_size {
            return None;
        }
        let mean = self.window_mean()?;
        let error_rate = self.error_rate()?;

        if self.baseline_count >= config.min_baseline_samples {
            if let Some(baseline) = self.baseline() {
                if mean < baseline - config.regression_threshold {
                    return Some(format!(
                        "window mean {mean:.3} below baseline {baseline:.3} by more than {:.3}",
                        config.regression_threshold
                    ));
                }
            }
        }
        if error_rate > config.error_rate_ceiling {
            return Some(format!(
                "error rate {error_rate:.2} above ceiling {:.2}",
                config.error_rate_ceiling
            ));
        }
        None
    }

    fn transition(&mut self, next: HealthState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        self.state = next;
        self.consecutive_regressed = 0;
        self.last_transition = Utc::now();
    }
}

#[derive(Debug, Clone)]
struct RollbackPin {
    variant_id: VariantId,
    remaining: u32,
}

/// Health tracking and rollback pins for every `(agent, variant)` pair.
pub struct SafetyMonitor {
    config: SafetyConfig,
    store: Arc<ValueStore>,
    health: RwLock<HashMap<VariantKey, VariantHealth>>,
    /// Last time each variant earned a good reward while healthy, per state.
    known_good: RwLock<HashMap<DecisionState, HashMap<VariantId, DateTime<Utc>>>>,
    pins: RwLock<HashMap<DecisionState, RollbackPin>>,
    alerts: RwLock<VecDeque<SafetyAlert>>,
    quarantine_events: AtomicU64,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig, store: Arc<ValueStore>) -> Self {
        Self {
            config,
            store,
            health: RwLock::new(HashMap::new()),
            known_good: RwLock::new(HashMap::new()),
            pins: RwLock::new(HashMap::new()),
            alerts: RwLock::new(VecDeque::new()),
            quarantine_events: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub async fn state(&self, agent_name: &str, variant_id: &VariantId) -> HealthState {
        self.health
            .read()
            .await
            .get(&(agent_name.to_string(), variant_id.clone()))
            .map_or(HealthState::Healthy, |h| h.state)
    }

    /// Candidates that may be offered to a policy, order preserved.
    pub async fn filter_candidates(
        &self,
        agent_name: &str,
        candidates: &[VariantId],
    ) -> Vec<VariantId> {
        let health = self.health.read().await;
        candidates
            .iter()
            .filter(|v| {
                health
                    .get(&(agent_name.to_string(), (*v).clone()))
                    .is_none_or(|h| h.state.is_selectable())
            })
            .cloned()
            .collect()
    }

    /// Error unless the variant may be selected.
    pub async fn check_selectable(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<()> {
        let state = self.state(agent_name, variant_id).await;
        if state.is_selectable() {
            Ok(())
        } else {
            Err(DomainError::QuarantineBreach {
                variant_id: variant_id.to_string(),
                state: state.to_string(),
            })
        }
    }

    /// Consume a rollback pin for `state` if one is active and its variant is
    /// among `candidates`.
    pub async fn rollback_target(
        &self,
        state: &DecisionState,
        candidates: &[VariantId],
    ) -> Option<VariantId> {
        let mut pins = self.pins.write().await;
        let pin = pins.get_mut(state)?;
        if pin.remaining == 0 || !candidates.contains(&pin.variant_id) {
            pins.remove(state);
            return None;
        }
        pin.remaining -= 1;
        let target = pin.variant_id.clone();
        if pin.remaining == 0 {
            pins.remove(state);
        }
        Some(target)
    }

    /// Feed one scored outcome into the state machine.
    pub async fn observe(
        &self,
        key: &StateActionKey,
        outcome: &OutcomeRecord,
        reward: f64,
    ) -> Option<SafetyEvent> {
        let agent_name = key.agent_name().to_string();
        let variant_id = key.variant_id().clone();
        let decision_state = key.state();

        let event = {
            let mut health = self.health.write().await;
            let h = health
                .entry((agent_name.clone(), variant_id.clone()))
                .or_insert_with(VariantHealth::new);

            if !h.state.is_selectable() {
                // Late reports for excluded variants do not move the machine.
                return None;
            }

            h.push(
                Observation {
                    reward,
                    success: outcome.success,
                },
                self.config.window_size.max(1),
            );

            if h.state == HealthState::Healthy && reward >= self.config.known_good_floor {
                self.known_good
                    .write()
                    .await
                    .entry(decision_state.clone())
                    .or_default()
                    .insert(variant_id.clone(), Utc::now());
            }

            if !self.config.enabled {
                return None;
            }

            let regression = h.regression(&self.config);
            match (h.state, regression) {
                (HealthState::Healthy, Some(reason)) => {
                    h.transition(HealthState::Suspect);
                    Some(SafetyEvent::BecameSuspect {
                        agent_name: agent_name.clone(),
                        variant_id: variant_id.clone(),
                        reason,
                    })
                }
                (HealthState::Suspect, Some(_)) => {
                    h.consecutive_regressed += 1;
                    if h.consecutive_regressed < self.config.confirmation_window {
                        None
                    } else {
                        h.quarantine_count += 1;
                        self.quarantine_events.fetch_add(1, Ordering::Relaxed);
                        h.transition(HealthState::Quarantined);
                        if h.quarantine_count >= self.config.max_quarantines {
                            h.transition(HealthState::Retired);
                            Some(SafetyEvent::Retired(RetirementApproval {
                                agent_name: agent_name.clone(),
                                variant_id: variant_id.clone(),
                                issued_at: Utc::now(),
                            }))
                        } else {
                            Some(SafetyEvent::Quarantined {
                                agent_name: agent_name.clone(),
                                variant_id: variant_id.clone(),
                                rollback_to: None,
                            })
                        }
                    }
                }
                (HealthState::Suspect, None) => {
                    h.transition(HealthState::Healthy);
                    Some(SafetyEvent::Cleared {
                        agent_name: agent_name.clone(),
                        variant_id: variant_id.clone(),
                    })
                }
                _ => None,
            }
        };

        match event {
            Some(SafetyEvent::Quarantined {
                agent_name,
                variant_id,
                ..
            }) => {
                let rollback_to = self.pin_known_good(&decision_state, &variant_id).await;
                warn!(
                    agent = %agent_name,
                    variant = %variant_id,
                    rollback_to = ?rollback_to.as_ref().map(VariantId::as_str),
                    "Variant quarantined"
                );
                self.raise(
                    Some(&agent_name),
                    Some(&variant_id),
                    format!("variant quarantined in {decision_state}"),
                )
                .await;
                Some(SafetyEvent::Quarantined {
                    agent_name,
                    variant_id,
                    rollback_to,
                })
            }
            Some(SafetyEvent::Retired(approval)) => {
                self.pin_known_good(&decision_state, approval.variant_id()).await;
                warn!(
                    agent = %approval.agent_name(),
                    variant = %approval.variant_id(),
                    "Variant reached quarantine limit and is retired"
                );
                self.raise(
                    Some(approval.agent_name()),
                    Some(approval.variant_id()),
                    "variant retired after repeated quarantines".to_string(),
                )
                .await;
                Some(SafetyEvent::Retired(approval))
            }
            Some(SafetyEvent::BecameSuspect {
                agent_name,
                variant_id,
                reason,
            }) => {
                info!(agent = %agent_name, variant = %variant_id, %reason, "Variant suspect");
                Some(SafetyEvent::BecameSuspect {
                    agent_name,
                    variant_id,
                    reason,
                })
            }
            other => other,
        }
    }

    /// Pin `state` to the most recent known-good variant other than
    /// `failing` that is still healthy.
    async fn pin_known_good(&self, state: &DecisionState, failing: &VariantId) -> Option<VariantId> {
        if self.config.rollback_cooldown == 0 {
            return None;
        }
        let mut ranked: Vec<(DateTime<Utc>, VariantId)> = self
            .known_good
            .read()
            .await
            .get(state)
            .map(|good| {
                good.iter()
                    .filter(|(variant, _)| *variant != failing)
                    .map(|(variant, at)| (*at, variant.clone()))
                    .collect()
            })
            .unwrap_or_default();
        // Newest first; equal timestamps go to the lowest id.
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, candidate) in ranked {
            if self.state(&state.agent_name, &candidate).await != HealthState::Healthy {
                continue;
            }
            self.pins.write().await.insert(
                state.clone(),
                RollbackPin {
                    variant_id: candidate.clone(),
                    remaining: self.config.rollback_cooldown,
                },
            );
            return Some(candidate);
        }
        None
    }

    async fn raise(&self, agent_name: Option<&str>, variant_id: Option<&VariantId>, message: String) {
        let mut alerts = self.alerts.write().await;
        alerts.push_back(SafetyAlert {
            raised_at: Utc::now(),
            agent_name: agent_name.map(str::to_string),
            variant_id: variant_id.cloned(),
            message,
        });
        while alerts.len() > MAX_ALERTS {
            alerts.pop_front();
        }
    }

    /// Operator reinstatement of a quarantined variant.
    pub async fn reinstate(&self, agent_name: &str, variant_id: &VariantId) -> DomainResult<()> {
        let mut health = self.health.write().await;
        let h = health
            .get_mut(&(agent_name.to_string(), variant_id.clone()))
            .ok_or_else(|| DomainError::VariantNotFound(variant_id.to_string()))?;
        if h.state != HealthState::Quarantined {
            return Err(DomainError::InvalidStateTransition {
                from: h.state.to_string(),
                to: HealthState::Healthy.to_string(),
                reason: "only quarantined variants can be reinstated".to_string(),
            });
        }
        h.transition(HealthState::Healthy);
        h.window.clear();
        info!(agent = %agent_name, variant = %variant_id, "Variant reinstated");
        Ok(())
    }

    /// Issue a retirement approval for an operator-initiated retirement.
    pub async fn approve_retirement(
        &self,
        agent_name: &str,
        variant_id: &VariantId,
    ) -> DomainResult<RetirementApproval> {
        let mut health = self.health.write().await;
        let h = health
            .entry((agent_name.to_string(), variant_id.clone()))
            .or_insert_with(VariantHealth::new);
        if !h.state.can_transition_to(HealthState::Retired) {
            return Err(DomainError::InvalidStateTransition {
                from: h.state.to_string(),
                to: HealthState::Retired.to_string(),
                reason: "variant is already retired".to_string(),
            });
        }
        h.transition(HealthState::Retired);
        Ok(RetirementApproval {
            agent_name: agent_name.to_string(),
            variant_id: variant_id.clone(),
            issued_at: Utc::now(),
        })
    }

    /// Mark variants the catalog already records as retired.
    pub async fn mark_retired(&self, agent_name: &str, variant_id: &VariantId) {
        let mut health = self.health.write().await;
        let h = health
            .entry((agent_name.to_string(), variant_id.clone()))
            .or_insert_with(VariantHealth::new);
        h.state = HealthState::Retired;
    }

    pub async fn status(&self) -> SafetyStatus {
        let mut variants: Vec<VariantHealthView> = self
            .health
            .read()
            .await
            .iter()
            .map(|((agent, variant), h)| VariantHealthView {
                agent_name: agent.clone(),
                variant_id: variant.clone(),
                state: h.state,
                window_mean: h.window_mean(),
                baseline: h.baseline(),
                error_rate: h.error_rate(),
                quarantine_count: h.quarantine_count,
                observations: h.observations,
                last_transition: h.last_transition,
            })
            .collect();
        variants.sort_by(|a, b| (&a.agent_name, &a.variant_id).cmp(&(&b.agent_name, &b.variant_id)));

        let mut rollback_pins: Vec<RollbackPinView> = self
            .pins
            .read()
            .await
            .iter()
            .map(|(state, pin)| RollbackPinView {
                agent_name: state.agent_name.clone(),
                task_type: state.task_type.to_string(),
                variant_id: pin.variant_id.clone(),
                remaining: pin.remaining,
            })
            .collect();
        rollback_pins.sort_by(|a, b| (&a.agent_name, &a.task_type).cmp(&(&b.agent_name, &b.task_type)));

        let store = self.store.health();
        let mut alerts: Vec<SafetyAlert> = self.alerts.read().await.iter().cloned().collect();
        if store.degraded {
            alerts.push(SafetyAlert {
                raised_at: Utc::now(),
                agent_name: None,
                variant_id: None,
                message: format!(
                    "value store degraded: {} consecutive failures, {} records buffered",
                    store.consecutive_failures, store.buffered_records
                ),
            });
        }

        SafetyStatus {
            variants,
            quarantine_events: self.quarantine_events.load(Ordering::Relaxed),
            store,
            rollback_pins,
            alerts,
        }
    }
}
