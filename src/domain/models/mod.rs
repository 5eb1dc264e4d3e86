//! Domain models for the learning engine.

pub mod config;
pub mod health;
pub mod key;
pub mod linear;
pub mod outcome;
pub mod selection;
pub mod similarity;
pub mod value;
pub mod variant;

pub use config::{
    ClassifierConfig, Config, CoordinatorConfig, DatabaseConfig, LearningConfig, LoggingConfig,
    MutatorConfig, RewardConfig, SafetyConfig, TransferConfig,
};
pub use health::HealthState;
pub use key::{DecisionState, StateActionKey, TaskType, VariantId};
pub use linear::LinearModelSnapshot;
pub use outcome::{OutcomeRecord, RawOutcome, TaskComplexity, DEFAULT_QUALITY_SCORE};
pub use selection::{PolicyDecision, PolicyKind, SelectionResult, TaskRequest};
pub use similarity::TaskSimilarityEntry;
pub use value::{StoreHealth, ValueEntry, ValueRecord};
pub use variant::{
    ConfigurationDelta, ModelTier, PerformanceMetrics, Variant, VariantOrigin, VariantStatus,
};
