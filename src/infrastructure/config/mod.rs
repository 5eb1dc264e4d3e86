//! Configuration loading.
//!
//! Hierarchical configuration using figment: programmatic defaults, then
//! project YAML files, then `METIS_*` environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
