//! Disjoint LinUCB contextual bandit.
//!
//! Each `(agent, variant)` arm keeps `A` (d x d, identity at start), `b` (d)
//! and a maintained inverse of `A`. Matrices are flat row-major vectors. The
//! inverse is updated with Sherman-Morrison and periodically recomputed by
//! Gauss-Jordan elimination to bound numerical drift.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::features::{FEATURE_DIM, FEATURE_VERSION};
use super::{ordered_candidates, streaming_mean, PolicyContext, SelectionPolicy};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DecisionState, LearningConfig, LinearModelSnapshot, PolicyDecision, PolicyKind,
    StateActionKey, ValueEntry, VariantId,
};
use crate::services::value_store::ValueStore;

type ArmKey = (String, VariantId);

/// Ridge-regression state of one arm.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearArm {
    dim: usize,
    a: Vec<f64>,
    a_inv: Vec<f64>,
    b: Vec<f64>,
    updates: u64,
}

fn identity(dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = 1.0;
    }
    m
}

fn mat_vec(m: &[f64], x: &[f64], dim: usize) -> Vec<f64> {
    (0..dim)
        .map(|i| (0..dim).map(|j| m[i * dim + j] * x[j]).sum())
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Inverse by Gauss-Jordan elimination with partial pivoting.
///
/// Returns `None` for a singular or non-finite matrix.
pub fn invert(matrix: &[f64], dim: usize) -> Option<Vec<f64>> {
    let mut work = matrix.to_vec();
    let mut inv = identity(dim);

    for col in 0..dim {
        let pivot_row = (col..dim).max_by(|&r1, &r2| {
            work[r1 * dim + col]
                .abs()
                .total_cmp(&work[r2 * dim + col].abs())
        })?;
        let pivot = work[pivot_row * dim + col];
        if !pivot.is_finite() || pivot.abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..dim {
                work.swap(pivot_row * dim + j, col * dim + j);
                inv.swap(pivot_row * dim + j, col * dim + j);
            }
        }

        let scale = 1.0 / pivot;
        for j in 0..dim {
            work[col * dim + j] *= scale;
            inv[col * dim + j] *= scale;
        }

        for row in 0..dim {
            if row == col {
                continue;
            }
            let factor = work[row * dim + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..dim {
                work[row * dim + j] -= factor * work[col * dim + j];
                inv[row * dim + j] -= factor * inv[col * dim + j];
            }
        }
    }
    Some(inv)
}

impl LinearArm {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            a: identity(dim),
            a_inv: identity(dim),
            b: vec![0.0; dim],
            updates: 0,
        }
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn a_inv(&self) -> &[f64] {
        &self.a_inv
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn theta(&self) -> Vec<f64> {
        mat_vec(&self.a_inv, &self.b, self.dim)
    }

    /// Point estimate and confidence width for context `x`.
    pub fn estimate(&self, x: &[f64]) -> (f64, f64) {
        let mean = dot(&self.theta(), x);
        let variance = dot(x, &mat_vec(&self.a_inv, x, self.dim)).max(0.0);
        (mean, variance.sqrt())
    }

    pub fn update(&mut self, x: &[f64], reward: f64, refresh_interval: u64) {
        let dim = self.dim;
        for i in 0..dim {
            self.b[i] += reward * x[i];
            for j in 0..dim {
                self.a[i * dim + j] += x[i] * x[j];
            }
        }

        // Sherman-Morrison; A is symmetric so A^-1 x serves as both factors.
        let u = mat_vec(&self.a_inv, x, dim);
        let denom = 1.0 + dot(x, &u);
        for i in 0..dim {
            for j in 0..dim {
                self.a_inv[i * dim + j] -= u[i] * u[j] / denom;
            }
        }

        self.updates += 1;
        if refresh_interval > 0 && self.updates % refresh_interval == 0 {
            self.refresh_inverse();
        }
    }

    /// Recompute the inverse directly. Keeps the current one if `A` is singular.
    pub fn refresh_inverse(&mut self) -> bool {
        match invert(&self.a, self.dim) {
            Some(inv) => {
                self.a_inv = inv;
                true
            }
            None => false,
        }
    }

    fn snapshot(&self, agent_name: &str, variant_id: &VariantId) -> LinearModelSnapshot {
        LinearModelSnapshot {
            agent_name: agent_name.to_string(),
            variant_id: variant_id.clone(),
            feature_version: FEATURE_VERSION,
            dimension: self.dim,
            a: self.a.clone(),
            b: self.b.clone(),
            updates: self.updates,
        }
    }

    fn from_snapshot(snapshot: &LinearModelSnapshot) -> Option<Self> {
        let a_inv = invert(&snapshot.a, snapshot.dimension)?;
        Some(Self {
            dim: snapshot.dimension,
            a: snapshot.a.clone(),
            a_inv,
            b: snapshot.b.clone(),
            updates: snapshot.updates,
        })
    }
}

/// LinUCB over per-arm linear models.
///
/// Arms are keyed by `(agent, variant)` so context features carry knowledge
/// across task types. The value store cell of the chosen key also receives a
/// streaming mean so visit statistics stay comparable across policies.
pub struct LinUcbPolicy {
    store: Arc<ValueStore>,
    arms: DashMap<ArmKey, LinearArm>,
    alpha: f64,
    refresh_interval: u64,
    dim: usize,
}

impl LinUcbPolicy {
    pub fn new(store: Arc<ValueStore>, config: &LearningConfig) -> Self {
        Self {
            store,
            arms: DashMap::new(),
            alpha: config.linucb_alpha,
            refresh_interval: config.linucb_refresh_interval,
            dim: FEATURE_DIM,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn features<'a>(&self, context: &'a PolicyContext) -> DomainResult<&'a [f64]> {
        let x = context.features.as_deref().unwrap_or(&[]);
        if x.len() != self.dim {
            return Err(DomainError::FeatureDimensionMismatch {
                expected: self.dim,
                actual: x.len(),
            });
        }
        Ok(x)
    }

    /// Copy of one arm's state, if it exists.
    pub fn arm(&self, agent_name: &str, variant_id: &VariantId) -> Option<LinearArm> {
        self.arms
            .get(&(agent_name.to_string(), variant_id.clone()))
            .map(|a| a.value().clone())
    }

    /// Snapshots of every arm, ordered by key.
    pub fn export(&self) -> Vec<LinearModelSnapshot> {
        let mut snapshots: Vec<LinearModelSnapshot> = self
            .arms
            .iter()
            .map(|e| e.value().snapshot(&e.key().0, &e.key().1))
            .collect();
        snapshots.sort_by(|a, b| {
            (&a.agent_name, &a.variant_id).cmp(&(&b.agent_name, &b.variant_id))
        });
        snapshots
    }

    /// Load persisted arms. Snapshots from another feature layout, or with a
    /// singular `A`, are discarded so the arm restarts from identity.
    pub fn import(&self, snapshots: &[LinearModelSnapshot]) -> usize {
        let mut loaded = 0;
        for snapshot in snapshots {
            if !snapshot.is_compatible(FEATURE_VERSION, self.dim) {
                warn!(
                    agent = %snapshot.agent_name,
                    variant = %snapshot.variant_id,
                    version = snapshot.feature_version,
                    dimension = snapshot.dimension,
                    "Discarding linear model from a different feature layout"
                );
                continue;
            }
            match LinearArm::from_snapshot(snapshot) {
                Some(arm) => {
                    self.arms.insert(
                        (snapshot.agent_name.clone(), snapshot.variant_id.clone()),
                        arm,
                    );
                    loaded += 1;
                }
                None => warn!(
                    agent = %snapshot.agent_name,
                    variant = %snapshot.variant_id,
                    "Discarding singular linear model"
                ),
            }
        }
        debug!(loaded, "Linear models imported");
        loaded
    }
}

impl SelectionPolicy for LinUcbPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::LinUcb
    }

    fn select(
        &self,
        state: &DecisionState,
        candidates: &[VariantId],
        context: &PolicyContext,
    ) -> DomainResult<PolicyDecision> {
        let x = self.features(context)?;
        let ordered = ordered_candidates(candidates)?;
        let fresh = LinearArm::new(self.dim);

        let mut best: Option<(VariantId, f64, f64)> = None;
        let mut best_mean = f64::NEG_INFINITY;
        for variant in ordered {
            let (mean, width) = match self.arms.get(&(state.agent_name.clone(), variant.clone())) {
                Some(arm) => arm.estimate(x),
                None => fresh.estimate(x),
            };
            let score = mean + self.alpha * width;
            best_mean = best_mean.max(mean);
            if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                best = Some((variant, mean, score));
            }
        }

        let (variant_id, mean, score) = best
            .ok_or_else(|| DomainError::ValidationFailed("candidate set is empty".to_string()))?;
        Ok(PolicyDecision {
            variant_id,
            estimated_value: mean,
            exploration: mean < best_mean,
            score,
        })
    }

    fn update(
        &self,
        key: &StateActionKey,
        reward: f64,
        context: &PolicyContext,
    ) -> DomainResult<ValueEntry> {
        let x = self.features(context)?;
        {
            let mut arm = self
                .arms
                .entry((key.agent_name().to_string(), key.variant_id().clone()))
                .or_insert_with(|| LinearArm::new(self.dim));
            arm.update(x, reward, self.refresh_interval);
        }
        Ok(self
            .store
            .update_with(key, |entry| streaming_mean(entry, reward)))
    }
}
