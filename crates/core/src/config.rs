use serde::Deserialize;

use crate::error::BanditResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CBANDIT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ridge: RidgeConfig,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RidgeConfig {
    /// Scale of the UCB exploration bonus.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_regularization")]
    pub regularization: f64,
    /// Keep only the most recent `window` rows when set.
    #[serde(default)]
    pub window: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorationConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_tau")]
    pub tau: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    ChernoffHoeffding,
    EmpiricalBernstein,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub kind: EstimatorKind,
    #[serde(default = "default_decay")]
    pub decay: f64,
    #[serde(default = "default_delta")]
    pub delta: f64,
    /// Upper cap on the log-importance-weight.
    #[serde(default)]
    pub clip: Option<f64>,
    /// Observations the new policy needs before it may replace the safe one.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_arms")]
    pub arms: usize,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default functions
fn default_alpha() -> f64 {
    1.0
}
fn default_regularization() -> f64 {
    1.0
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_tau() -> f64 {
    1.0
}
fn default_decay() -> f64 {
    0.99
}
fn default_delta() -> f64 {
    0.95
}
fn default_min_samples() -> u64 {
    100
}
fn default_arms() -> usize {
    4
}
fn default_dims() -> usize {
    6
}
fn default_batch_size() -> usize {
    32
}
fn default_steps() -> usize {
    500
}
fn default_seed() -> u64 {
    42
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            regularization: default_regularization(),
            window: None,
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            tau: default_tau(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::default(),
            decay: default_decay(),
            delta: default_delta(),
            clip: None,
            min_samples: default_min_samples(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            arms: default_arms(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            steps: default_steps(),
            seed: default_seed(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ridge: RidgeConfig::default(),
            exploration: ExplorationConfig::default(),
            estimator: EstimatorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> BanditResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CBANDIT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
