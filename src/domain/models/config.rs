use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::selection::PolicyKind;

/// Main configuration structure for Metis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Selection policy parameters
    #[serde(default)]
    pub learning: LearningConfig,

    /// Reward shaping weights and duration baselines
    #[serde(default)]
    pub reward: RewardConfig,

    /// Task classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Cross-task warm start settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Safety monitor thresholds
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Evolutionary search settings
    #[serde(default)]
    pub mutator: MutatorConfig,

    /// Decision-cycle bookkeeping
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".metis/metis.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Selection policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LearningConfig {
    /// Active policy
    pub policy: PolicyKind,
    /// Exploration probability for epsilon-greedy
    pub epsilon: f64,
    /// Constant TD(0) step size
    pub alpha: f64,
    /// UCB1 exploration constant
    pub ucb_exploration: f64,
    /// LinUCB confidence width
    pub linucb_alpha: f64,
    /// Recompute the LinUCB inverse directly every N updates
    pub linucb_refresh_interval: u64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::QLearning,
            epsilon: 0.10,
            alpha: 0.10,
            ucb_exploration: std::f64::consts::SQRT_2,
            linucb_alpha: 1.0,
            linucb_refresh_interval: 50,
            seed: None,
        }
    }
}

/// Reward shaping weights and duration baselines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RewardConfig {
    pub success_weight: f64,
    pub quality_weight: f64,
    pub time_weight: f64,
    /// Penalty per reported error
    pub error_penalty: f64,
    /// Cap on the total error penalty
    pub max_error_penalty: f64,
    /// Expected duration for low-complexity tasks
    pub baseline_low_secs: f64,
    /// Expected duration for medium-complexity tasks
    pub baseline_medium_secs: f64,
    /// Expected duration for high-complexity tasks
    pub baseline_high_secs: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            success_weight: 0.5,
            quality_weight: 0.3,
            time_weight: 0.2,
            error_penalty: 0.1,
            max_error_penalty: 0.4,
            baseline_low_secs: 60.0,
            baseline_medium_secs: 300.0,
            baseline_high_secs: 900.0,
        }
    }
}

/// Task classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// Minimum share of the keyword score the best label must hold
    pub confidence_floor: f64,
    /// Extra keywords per label, merged with the built-in vocabulary
    pub extra_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.35,
            extra_keywords: BTreeMap::new(),
        }
    }
}

/// Cross-task warm start settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TransferConfig {
    pub enabled: bool,
    /// Donor cells need at least this many visits
    pub min_donor_visits: u64,
    /// A state with fewer total visits is considered sparse
    pub sparse_visit_threshold: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_donor_visits: 5,
            sparse_visit_threshold: 3,
        }
    }
}

/// Safety monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SafetyConfig {
    pub enabled: bool,
    /// Rolling window of recent outcomes
    pub window_size: usize,
    /// Allowed drop of the window mean below the baseline
    pub regression_threshold: f64,
    /// Maximum tolerated failure share within the window
    pub error_rate_ceiling: f64,
    /// Consecutive regressed observations needed to quarantine
    pub confirmation_window: usize,
    /// Aged-out outcomes needed before the baseline is trusted
    pub min_baseline_samples: u64,
    /// Quarantines after which a variant is retired
    pub max_quarantines: u32,
    /// Rewards at or above this mark a variant as known-good
    pub known_good_floor: f64,
    /// Selections pinned to the known-good variant after a quarantine
    pub rollback_cooldown: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 10,
            regression_threshold: 0.3,
            error_rate_ceiling: 0.6,
            confirmation_window: 5,
            min_baseline_samples: 10,
            max_quarantines: 3,
            known_good_floor: 0.0,
            rollback_cooldown: 20,
        }
    }
}

/// Evolutionary search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MutatorConfig {
    pub population_size: usize,
    /// Top candidates copied unchanged into the next generation
    pub elite_count: usize,
    pub tournament_size: usize,
    /// Probability that a child comes from crossover rather than mutation only
    pub crossover_rate: f64,
    pub trials_per_candidate: usize,
    /// Relative standard deviation of parameter perturbations
    pub parameter_sigma: f64,
    /// Inclusive bounds per tunable parameter
    pub parameter_bounds: BTreeMap<String, (f64, f64)>,
    /// Instruction fragments the instruction axis draws from
    pub instruction_pool: Vec<String>,
    /// Required mean-reward gain over the incumbent before auto-promotion
    pub promotion_margin: f64,
    pub auto_promote: bool,
    pub seed: Option<u64>,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        let mut parameter_bounds = BTreeMap::new();
        parameter_bounds.insert("temperature".to_string(), (0.0, 1.0));
        parameter_bounds.insert("max_iterations".to_string(), (1.0, 50.0));
        parameter_bounds.insert("context_budget".to_string(), (0.1, 1.0));

        Self {
            population_size: 8,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.5,
            trials_per_candidate: 5,
            parameter_sigma: 0.15,
            parameter_bounds,
            instruction_pool: vec![
                "Think through the plan before editing files.".to_string(),
                "Prefer minimal, focused diffs.".to_string(),
                "Write or update tests alongside code changes.".to_string(),
                "Run the build after each significant change.".to_string(),
                "Summarize assumptions before starting.".to_string(),
            ],
            promotion_margin: 0.05,
            auto_promote: false,
            seed: None,
        }
    }
}

/// Decision-cycle bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Pending decisions older than this are dropped unreported
    pub pending_ttl_secs: i64,
    /// Upper bound on tracked pending decisions
    pub max_pending: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 3600,
            max_pending: 10_000,
        }
    }
}
