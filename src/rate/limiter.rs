//! Randomized inter-request delays
//!
//! Spaces requests per key (account or proxy) by a uniformly random delay,
//! so request timing does not correlate into an obviously automated
//! pattern. This only delays; it never rejects. Hard capacity limits live
//! in the account pool's daily quota.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Delay bounds for one rate-limiting layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
        }
    }
}

impl RateConfig {
    /// Bounds for the per-account layer: 30 to 90 seconds
    pub fn per_account() -> Self {
        Self {
            min_delay_ms: 30_000,
            max_delay_ms: 90_000,
        }
    }

    fn sample(&self) -> Duration {
        let upper = self.max_delay_ms.max(self.min_delay_ms);
        Duration::from_millis(rand::rng().random_range(self.min_delay_ms..=upper))
    }
}

/// Time still to wait given a sampled delay and the time already elapsed
fn remaining_wait(delay: Duration, elapsed: Duration) -> Duration {
    delay.saturating_sub(elapsed)
}

/// Per-key randomized rate limiter
pub struct RateLimiter {
    config: RateConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until the next request for this key may proceed; returns the
    /// delay actually applied. The first request per key passes untouched.
    pub async fn wait_for_next(&self, key: &str) -> Duration {
        let delay = self.config.sample();
        let wait = {
            let last = self.last_request.lock().unwrap();
            match last.get(key) {
                Some(at) => remaining_wait(delay, at.elapsed()),
                None => Duration::ZERO,
            }
        };

        if !wait.is_zero() {
            debug!(%key, wait_ms = wait.as_millis() as u64, "RateLimiter::wait_for_next: sleeping");
            tokio::time::sleep(wait).await;
        }

        self.last_request.lock().unwrap().insert(key.to_string(), Instant::now());
        wait
    }
}
