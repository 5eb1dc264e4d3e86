//! Domain errors for the Metis learning engine.

use thiserror::Error;

/// Domain-level errors that can occur in the Metis system.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("No task type cleared the confidence floor (best: {best_label} at {confidence:.2})")]
    ClassificationAmbiguous { best_label: String, confidence: f64 },

    #[error("Unknown variant '{variant_id}' for agent '{agent_name}'")]
    UnknownVariant { agent_name: String, variant_id: String },

    #[error("Value store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed outcome: {0}")]
    MalformedOutcome(String),

    #[error("Variant '{variant_id}' is {state} and cannot be selected")]
    QuarantineBreach { variant_id: String, state: String },

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    FeatureDimensionMismatch { expected: usize, actual: usize },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_variant() {
        let err = DomainError::QuarantineBreach {
            variant_id: "opt".to_string(),
            state: "quarantined".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Variant 'opt' is quarantined and cannot be selected"
        );

        let err = DomainError::UnknownVariant {
            agent_name: "A".to_string(),
            variant_id: "ghost".to_string(),
        };
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err: DomainError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, DomainError::SerializationError(_)));
    }
}
