//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pool::PoolConfig;
use crate::queue::DispatcherConfig;
use crate::rate::RateConfig;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account pool thresholds and proxy exclusion
    pub pool: PoolConfig,

    /// Rate limiting layers
    pub rate: RateLayersConfig,

    /// Worker pool
    pub dispatcher: DispatcherConfig,

    /// External executor command
    pub executor: ExecutorConfig,

    /// Persistence
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.workers == 0 {
            return Err(eyre::eyre!("dispatcher.workers must be at least 1"));
        }
        for (name, rate) in [
            ("rate.execution", &self.rate.execution),
            ("rate.account", &self.rate.account),
        ] {
            if rate.min_delay_ms > rate.max_delay_ms {
                return Err(eyre::eyre!(
                    "{}: min_delay_ms ({}) exceeds max_delay_ms ({})",
                    name,
                    rate.min_delay_ms,
                    rate.max_delay_ms
                ));
            }
        }
        if self.pool.health.soft_failure_threshold == 0
            || self.pool.health.hard_failure_threshold <= self.pool.health.soft_failure_threshold
        {
            return Err(eyre::eyre!(
                "pool.health thresholds must satisfy 0 < soft < hard (got soft={}, hard={})",
                self.pool.health.soft_failure_threshold,
                self.pool.health.hard_failure_threshold
            ));
        }
        if self.executor.command.is_empty() {
            return Err(eyre::eyre!("executor.command must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .scrapedaemon.yml
        let local_config = PathBuf::from(".scrapedaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/scrapedaemon/scrapedaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("scrapedaemon").join("scrapedaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Both rate-limiting layers
///
/// The execution layer spaces requests per proxy; the account layer spaces
/// successive uses of the same account much further apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLayersConfig {
    pub execution: RateConfig,
    pub account: RateConfig,
}

impl Default for RateLayersConfig {
    fn default() -> Self {
        Self {
            execution: RateConfig::default(),
            account: RateConfig::per_account(),
        }
    }
}

/// External executor command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program invoked once per URL; receives credential/proxy via env
    pub command: String,

    /// Arguments prepended before the URL
    pub args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: "scrape-exec".to_string(),
            args: Vec::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/scrapedaemon on Linux)
        let db_path = dirs::data_dir()
            .map(|d| d.join("scrapedaemon"))
            .unwrap_or_else(|| PathBuf::from(".scrapedaemon"))
            .join("state.db");

        Self { db_path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();

        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.rate.execution.min_delay_ms, 2_000);
        assert_eq!(config.rate.account.max_delay_ms, 90_000);
        assert_eq!(config.pool.health.soft_failure_threshold, 3);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
pool:
  health:
    soft_failure_threshold: 2
    hard_failure_threshold: 6
  max_proxy_failures: 4

rate:
  execution:
    min_delay_ms: 500
    max_delay_ms: 1500

dispatcher:
  workers: 8

executor:
  command: "headless-scraper"
  args: ["--headless"]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pool.health.soft_failure_threshold, 2);
        assert_eq!(config.pool.max_proxy_failures, 4);
        assert_eq!(config.rate.execution.max_delay_ms, 1_500);
        // Account layer untouched by partial config
        assert_eq!(config.rate.account.min_delay_ms, 30_000);
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.executor.command, "headless-scraper");
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.dispatcher.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = Config::default();
        config.rate.execution.min_delay_ms = 10_000;
        config.rate.execution.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.pool.health.hard_failure_threshold = config.pool.health.soft_failure_threshold;
        assert!(config.validate().is_err());
    }
}
