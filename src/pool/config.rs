//! Pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::HealthPolicy;

/// Account pool and proxy rotator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Account health thresholds and backoff curve
    #[serde(default)]
    pub health: HealthPolicy,

    /// Back-off interval between acquire attempts when no account is eligible
    #[serde(default = "default_acquire_retry_ms")]
    pub acquire_retry_ms: u64,

    /// Failures before a proxy is excluded from rotation
    #[serde(default = "default_max_proxy_failures")]
    pub max_proxy_failures: u32,
}

fn default_acquire_retry_ms() -> u64 {
    5_000
}

fn default_max_proxy_failures() -> u32 {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health: HealthPolicy::default(),
            acquire_retry_ms: 5_000,
            max_proxy_failures: 5,
        }
    }
}

impl PoolConfig {
    /// Acquire back-off as a Duration
    pub fn acquire_retry(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.acquire_retry_ms, 5_000);
        assert_eq!(config.max_proxy_failures, 5);
        assert_eq!(config.health.soft_failure_threshold, 3);
        assert_eq!(config.health.hard_failure_threshold, 10);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PoolConfig = serde_yaml::from_str("acquire_retry_ms: 100").unwrap();
        assert_eq!(config.acquire_retry(), Duration::from_millis(100));
        assert_eq!(config.max_proxy_failures, 5);
    }
}
