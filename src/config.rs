use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::EngineMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Operating mode for the event manager owned by this process
    #[serde(default)]
    pub mode: EngineMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Paper,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum events pulled per dispatch cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sleep between empty dispatch polls (ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_batch_size() -> usize {
    16
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Residue below this counts as fully filled (avoids decimal-dust deadlock)
    #[serde(default = "default_fill_epsilon")]
    pub fill_epsilon: Decimal,
    /// Maximum retry attempts for exchange submission
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Base backoff between submission retries (ms)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_fill_epsilon() -> Decimal {
    Decimal::new(1, 8) // 1e-8
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_backoff() -> u64 {
    250
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_epsilon: default_fill_epsilon(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then layer GAMBIT__* env vars on top
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("GAMBIT").separator("__"))
            .build()?
            .try_deserialize()
    }
}
