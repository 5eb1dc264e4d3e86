//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - ValueLog: append-only durable log behind the value store
//! - VariantCatalog: variant definitions and performance snapshots
//! - SimilarityStore: task-type similarity table for warm starts
//! - LinearModelStore: contextual bandit arms
//! - FitnessEvaluator: trial executions for evolutionary search
//!
//! These traits let the learning services stay independent of the storage backend.

pub mod fitness_evaluator;
pub mod in_memory;
pub mod linear_model_store;
pub mod similarity_store;
pub mod value_log;
pub mod variant_catalog;

pub use fitness_evaluator::FitnessEvaluator;
pub use in_memory::{
    InMemoryLinearModelStore, InMemorySimilarityStore, InMemoryValueLog, InMemoryVariantCatalog,
};
pub use linear_model_store::LinearModelStore;
pub use similarity_store::SimilarityStore;
pub use value_log::ValueLog;
pub use variant_catalog::VariantCatalog;
