//! Domain types shared across the scheduler
//!
//! Plain data with their own state machines; all coordination (claims,
//! queueing, retries) lives in the pool and queue modules.

pub mod account;
pub mod id;
pub mod job;
pub mod proxy;
pub mod unit;

pub use account::{Account, AccountStatus, Credential, HealthPolicy, HealthTransition, backoff_ms};
pub use id::generate_id;
pub use job::{Job, JobProgress, JobStatus};
pub use proxy::{Proxy, ProxyProtocol};
pub use unit::{UnitStatus, WorkUnit};

/// Current time as unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
