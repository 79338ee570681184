//! Randomized rate limiting

pub mod limiter;

pub use limiter::{RateConfig, RateLimiter};
