//! Persisted form of a LinUCB arm.

use serde::{Deserialize, Serialize};

use super::key::VariantId;

/// Snapshot of one arm's `(A, b)` pair, tagged with the feature layout it was
/// trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelSnapshot {
    pub agent_name: String,
    pub variant_id: VariantId,
    pub feature_version: u32,
    pub dimension: usize,
    /// Row-major `dimension x dimension` covariance matrix.
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub updates: u64,
}

impl LinearModelSnapshot {
    /// Whether the snapshot matches the running feature extractor.
    pub fn is_compatible(&self, feature_version: u32, dimension: usize) -> bool {
        self.feature_version == feature_version
            && self.dimension == dimension
            && self.a.len() == dimension * dimension
            && self.b.len() == dimension
    }
}
