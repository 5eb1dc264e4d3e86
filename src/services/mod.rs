//! Learning services built on the domain ports.

pub mod coordinator;
pub mod policies;
pub mod reward_calculator;
pub mod safety_monitor;
pub mod task_classifier;
pub mod transfer_learning;
pub mod value_store;
pub mod variant_mutator;
pub mod variant_repository;

pub use coordinator::{Coordinator, CoordinatorStatus, PendingDecision};
pub use policies::{PolicyContext, SelectionPolicy};
pub use reward_calculator::RewardCalculator;
pub use safety_monitor::{RetirementApproval, SafetyEvent, SafetyMonitor, SafetyStatus};
pub use task_classifier::{Classification, TaskClassifier};
pub use transfer_learning::TransferEngine;
pub use value_store::{ValueStore, WriterRetry};
pub use variant_mutator::{
    Candidate, HistoricalEvaluator, MutationAxis, SearchReport, VariantMutator,
};
pub use variant_repository::{VariantRepository, DEFAULT_VARIANT_ID};
