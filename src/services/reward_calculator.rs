//! Scalar reward shaping for execution outcomes.
//!
//! The reward combines a success term, a quality term, a duration term relative
//! to a complexity-dependent baseline, and a capped error penalty. The total is
//! clamped to [-1, 1].

use crate::domain::models::{OutcomeRecord, RewardConfig, TaskComplexity};

/// Converts outcome records into rewards in [-1, 1].
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Expected duration for a task of the given complexity.
    pub fn baseline_seconds(&self, complexity: TaskComplexity) -> f64 {
        match complexity {
            TaskComplexity::Low => self.config.baseline_low_secs,
            TaskComplexity::Medium => self.config.baseline_medium_secs,
            TaskComplexity::High => self.config.baseline_high_secs,
        }
    }

    /// Duration score in [-1, 1]: 1 at or under the baseline, falling linearly
    /// to -1 at three times the baseline.
    ///
    /// A missing duration is treated as exactly on baseline.
    pub fn time_score(&self, outcome: &OutcomeRecord) -> f64 {
        let baseline = self.baseline_seconds(outcome.task_complexity);
        let Some(duration) = outcome.duration_seconds else {
            return 1.0;
        };
        if baseline <= 0.0 {
            return 0.0;
        }
        let ratio = duration / baseline;
        if ratio <= 1.0 {
            1.0
        } else {
            (2.0 - ratio).clamp(-1.0, 1.0)
        }
    }

    pub fn calculate(&self, outcome: &OutcomeRecord) -> f64 {
        let cfg = &self.config;
        let quality = outcome.quality_score.clamp(0.0, 1.0);
        let time = self.time_score(outcome);

        let (success_term, quality_term, time_term) = if outcome.success {
            (
                cfg.success_weight,
                cfg.quality_weight * (2.0 * quality - 1.0),
                cfg.time_weight * time,
            )
        } else {
            // A fast failure earns nothing; a slow one is penalised.
            (
                -cfg.success_weight,
                cfg.quality_weight * (quality - 1.0),
                cfg.time_weight * time.min(0.0),
            )
        };

        let error_term =
            (f64::from(outcome.error_count) * cfg.error_penalty).min(cfg.max_error_penalty);

        let reward = success_term + quality_term + time_term - error_term;
        if reward.is_finite() {
            reward.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}
