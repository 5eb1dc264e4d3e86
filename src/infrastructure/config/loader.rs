use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid {field}: {value}. Must be within [0, 1]")]
    InvalidProbability { field: &'static str, value: f64 },

    #[error("Invalid {field}: {value}. Must be positive")]
    NonPositive { field: &'static str, value: f64 },

    #[error("Invalid {field}: must be at least {min}")]
    TooSmall { field: &'static str, min: usize },

    #[error("Invalid bounds for parameter '{name}': {lo} must be less than {hi}")]
    InvalidParameterBounds { name: String, lo: f64, hi: f64 },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn at_least(field: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::TooSmall { field, min })
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Environment variable prefix; `__` separates nested keys.
    pub const ENV_PREFIX: &'static str = "METIS_";

    /// Load configuration from the working directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .metis/config.yaml
    /// 3. .metis/local.yaml
    /// 4. Environment variables (METIS_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same precedence as [`ConfigLoader::load`], rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Self::figment(dir.as_ref())
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(dir: &Path) -> Figment {
        let metis_dir = dir.join(".metis");
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(metis_dir.join("config.yaml")))
            .merge(Yaml::file(metis_dir.join("local.yaml")))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let learning = &config.learning;
        probability("learning.epsilon", learning.epsilon)?;
        positive("learning.alpha", learning.alpha)?;
        probability("learning.alpha", learning.alpha)?;
        positive("learning.ucb_exploration", learning.ucb_exploration)?;
        positive("learning.linucb_alpha", learning.linucb_alpha)?;
        at_least(
            "learning.linucb_refresh_interval",
            learning.linucb_refresh_interval as usize,
            1,
        )?;

        let reward = &config.reward;
        for (field, weight) in [
            ("reward.success_weight", reward.success_weight),
            ("reward.quality_weight", reward.quality_weight),
            ("reward.time_weight", reward.time_weight),
            ("reward.error_penalty", reward.error_penalty),
            ("reward.max_error_penalty", reward.max_error_penalty),
        ] {
            if weight < 0.0 || !weight.is_finite() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{field} must be a non-negative number, got {weight}"
                )));
            }
        }
        positive("reward.baseline_low_secs", reward.baseline_low_secs)?;
        positive("reward.baseline_medium_secs", reward.baseline_medium_secs)?;
        positive("reward.baseline_high_secs", reward.baseline_high_secs)?;

        probability("classifier.confidence_floor", config.classifier.confidence_floor)?;

        let safety = &config.safety;
        at_least("safety.window_size", safety.window_size, 1)?;
        at_least("safety.confirmation_window", safety.confirmation_window, 1)?;
        at_least("safety.max_quarantines", safety.max_quarantines as usize, 1)?;
        positive("safety.regression_threshold", safety.regression_threshold)?;
        probability("safety.error_rate_ceiling", safety.error_rate_ceiling)?;

        let mutator = &config.mutator;
        at_least("mutator.population_size", mutator.population_size, 2)?;
        at_least("mutator.tournament_size", mutator.tournament_size, 1)?;
        at_least("mutator.trials_per_candidate", mutator.trials_per_candidate, 1)?;
        probability("mutator.crossover_rate", mutator.crossover_rate)?;
        positive("mutator.parameter_sigma", mutator.parameter_sigma)?;
        if mutator.elite_count >= mutator.population_size {
            return Err(ConfigError::ValidationFailed(format!(
                "mutator.elite_count ({}) must be smaller than population_size ({})",
                mutator.elite_count, mutator.population_size
            )));
        }
        for (name, (lo, hi)) in &mutator.parameter_bounds {
            if lo >= hi {
                return Err(ConfigError::InvalidParameterBounds {
                    name: name.clone(),
                    lo: *lo,
                    hi: *hi,
                });
            }
        }

        positive(
            "coordinator.pending_ttl_secs",
            config.coordinator.pending_ttl_secs as f64,
        )?;
        at_least("coordinator.max_pending", config.coordinator.max_pending, 1)?;

        Ok(())
    }
}
