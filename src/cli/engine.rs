//! Wiring of the persisted engine for one CLI invocation.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::adapters::sqlite::{
    initialize_from_config, SqliteLinearModelStore, SqliteSimilarityStore, SqliteValueLog,
    SqliteVariantCatalog,
};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Coordinator, ValueStore, VariantRepository};

/// Load configuration from `path`, or hierarchically from the working directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Open the database, replay the value log and restore every store.
pub async fn open(config: &Config) -> Result<Coordinator> {
    let pool = initialize_from_config(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;

    let store = Arc::new(
        ValueStore::open(Arc::new(SqliteValueLog::new(pool.clone())))
            .await
            .context("Failed to replay the value log")?,
    );
    let repository = Arc::new(VariantRepository::new(Arc::new(SqliteVariantCatalog::new(
        pool.clone(),
    ))));

    let coordinator = Coordinator::new(
        config,
        store,
        repository,
        Arc::new(SqliteSimilarityStore::new(pool.clone())),
    )
    .with_linear_models(Arc::new(SqliteLinearModelStore::new(pool)));

    coordinator
        .restore()
        .await
        .context("Failed to restore engine state")?;
    Ok(coordinator)
}
