//! Metis - online variant selection and learning engine
//!
//! Metis decides which configuration variant of an agent should handle an
//! incoming task, observes the outcome, and learns from it. Values live in an
//! append-only, replayable store keyed by (agent, task type, variant).
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the persistence ports
//! - **Service Layer** (`services`): policies, reward shaping, classification,
//!   transfer, mutation, safety and the coordinator that ties them together
//! - **Adapters** (`adapters`): SQLite implementations of the ports
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator command-line interface
//!
//! # Example
//!
//! ```ignore
//! use metis::{Coordinator, RawOutcome, TaskRequest};
//!
//! let selection = coordinator.select(TaskRequest::new("coder", "fix the crash")).await;
//! // ... run the agent with selection.variant_id ...
//! coordinator.report(selection.invocation_id, RawOutcome::success().with_quality(0.9)).await;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, DecisionState, OutcomeRecord, PolicyKind, RawOutcome, SelectionResult,
    StateActionKey, TaskRequest, TaskType, ValueEntry, Variant, VariantId,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Coordinator, ValueStore, VariantMutator, VariantRepository};
