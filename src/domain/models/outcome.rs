//! Outcome records reported by the invocation pipeline.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Coarse task complexity carried on an outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Map a continuous estimate in [0, 1] onto the three buckets.
    pub fn from_estimate(estimate: f64) -> Self {
        if estimate < 0.34 {
            Self::Low
        } else if estimate < 0.67 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Outcome as delivered by the logging pipeline; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub error_count: Option<u32>,
    #[serde(default)]
    pub task_complexity: Option<TaskComplexity>,
}

impl RawOutcome {
    pub fn success() -> Self {
        Self {
            success: Some(true),
            ..Default::default()
        }
    }

    pub fn failure() -> Self {
        Self {
            success: Some(false),
            ..Default::default()
        }
    }

    /// Raw form of [`OutcomeRecord::timeout`].
    pub fn timeout(duration_seconds: f64, task_complexity: TaskComplexity) -> Self {
        Self {
            success: Some(false),
            quality_score: Some(0.0),
            duration_seconds: Some(duration_seconds.max(0.0)),
            error_count: Some(1),
            task_complexity: Some(task_complexity),
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality_score = Some(quality);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_errors(mut self, errors: u32) -> Self {
        self.error_count = Some(errors);
        self
    }

    pub fn with_complexity(mut self, complexity: TaskComplexity) -> Self {
        self.task_complexity = Some(complexity);
        self
    }
}

/// Validated outcome of one execution. Consumed once, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub success: bool,
    /// Always within [0, 1].
    pub quality_score: f64,
    /// `None` when the pipeline did not report a usable duration.
    pub duration_seconds: Option<f64>,
    pub error_count: u32,
    pub task_complexity: TaskComplexity,
}

/// Quality assumed when the pipeline does not report one.
pub const DEFAULT_QUALITY_SCORE: f64 = 0.5;

impl OutcomeRecord {
    pub fn new(success: bool, quality_score: f64) -> Self {
        Self {
            success,
            quality_score: quality_score.clamp(0.0, 1.0),
            duration_seconds: None,
            error_count: 0,
            task_complexity: TaskComplexity::default(),
        }
    }

    /// Failure record for an execution that exceeded its time budget.
    pub fn timeout(duration_seconds: f64, task_complexity: TaskComplexity) -> Self {
        Self {
            success: false,
            quality_score: 0.0,
            duration_seconds: Some(duration_seconds.max(0.0)),
            error_count: 1,
            task_complexity,
        }
    }

    /// Validate a raw outcome. Only a missing `success` flag is fatal.
    pub fn from_raw(raw: &RawOutcome) -> DomainResult<Self> {
        let success = raw.success.ok_or_else(|| {
            DomainError::MalformedOutcome("missing required field 'success'".to_string())
        })?;

        let quality_score = match raw.quality_score {
            Some(q) if q.is_finite() => q.clamp(0.0, 1.0),
            _ => DEFAULT_QUALITY_SCORE,
        };

        let duration_seconds = raw
            .duration_seconds
            .filter(|d| d.is_finite() && *d >= 0.0);

        Ok(Self {
            success,
            quality_score,
            duration_seconds,
            error_count: raw.error_count.unwrap_or(0),
            task_complexity: raw.task_complexity.unwrap_or_default(),
        })
    }
}

impl TryFrom<RawOutcome> for OutcomeRecord {
    type Error = DomainError;

    fn try_from(raw: RawOutcome) -> Result<Self, Self::Error> {
        Self::from_raw(&raw)
    }
}
