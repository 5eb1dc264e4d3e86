use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{OutcomeRecord, TaskType, Variant};

/// Runs trial executions of a candidate variant outside the decision path.
#[async_trait]
pub trait FitnessEvaluator: Send + Sync {
    /// Execute up to `trials` trial tasks of `task_type` and return their outcomes.
    async fn evaluate(
        &self,
        variant: &Variant,
        task_type: &TaskType,
        trials: usize,
    ) -> DomainResult<Vec<OutcomeRecord>>;
}
