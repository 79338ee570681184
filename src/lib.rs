//! ScrapeDaemon - Account Pool & Job Dispatch Scheduler
//!
//! ScrapeDaemon distributes bulk scrape jobs across a pool of authenticated
//! accounts, each with a daily quota, cooldown windows, and failure history.
//! For every unit of work the scheduler decides which account (and which
//! network egress point) may execute it, when, and what happens to that
//! account's health afterward.
//!
//! # Core Concepts
//!
//! - **One claim per account**: the pool hands out scoped claim guards; an
//!   account is never used by two workers at once
//! - **Health as a state machine**: failures escalate accounts through
//!   cooldown (exponential backoff) to blocked; successes reset the counter
//! - **Lazy recovery**: cooldown expiry is applied at claim time, there is
//!   no background sweep
//! - **Only delays, never rejects**: rate limiting paces requests with
//!   randomized gaps; hard capacity lives in the daily quota
//!
//! # Modules
//!
//! - [`domain`] - Account, proxy, job, and work-unit record types
//! - [`pool`] - Account claim/release and proxy rotation
//! - [`rate`] - Randomized per-key rate limiting
//! - [`queue`] - Job queue, retries, and the dispatcher worker pool
//! - [`exec`] - Executor/validator collaborator traits
//! - [`store`] - Repository trait with memory and SQLite backends
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exec;
pub mod pool;
pub mod queue;
pub mod rate;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ExecutorConfig, RateLayersConfig, StorageConfig};
pub use domain::{
    Account, AccountStatus, Credential, HealthPolicy, Job, JobProgress, JobStatus, Proxy, ProxyProtocol, UnitStatus,
    WorkUnit,
};
pub use error::{DispatchError, StoreError};
pub use exec::{CommandExecutor, ErrorKind, ExecReport, Executor, Validation, Validator};
pub use pool::{
    AccountClaim, AccountPool, AcquireResult, ClaimOutcome, PoolConfig, PoolStats, ProxyRotator, SelectionStrategy,
    UnavailableReason,
};
pub use queue::{CheckedOutUnit, Dispatcher, DispatcherConfig, JobQueue, UnitOutcome};
pub use rate::{RateConfig, RateLimiter};
pub use store::{MemoryRepository, Repository, SqliteRepository};
