//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use metis::domain::models::{Config, ConfigurationDelta, Variant};
use metis::domain::ports::{InMemorySimilarityStore, InMemoryVariantCatalog};
use metis::services::{Coordinator, ValueStore, VariantRepository};

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
/// Keep the `TempDir` alive for as long as the database is used.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("metis.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes a tracing subscriber that writes through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Purely greedy, seeded configuration.
pub fn greedy_config() -> Config {
    let mut config = Config::default();
    config.learning.epsilon = 0.0;
    config.learning.seed = Some(7);
    config
}

/// In-memory coordinator with agent `agent` owning the given variants.
pub async fn in_memory_coordinator(config: &Config, agent: &str, variants: &[&str]) -> Coordinator {
    let store = Arc::new(ValueStore::in_memory());
    let repository = Arc::new(VariantRepository::new(Arc::new(InMemoryVariantCatalog::new())));
    for id in variants {
        repository
            .register(Variant::authored(agent, *id, ConfigurationDelta::default()))
            .await
            .expect("Failed to register variant");
    }
    Coordinator::new(
        config,
        store,
        repository,
        Arc::new(InMemorySimilarityStore::new()),
    )
}
