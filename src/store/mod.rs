//! Persistence layer
//!
//! All shared state is read and written through the [`Repository`] trait so
//! storage technology stays substitutable. The pool and queue never touch a
//! database directly; they hold a `dyn Repository` and go through it on
//! every state change.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::domain::{Account, Job, Proxy, WorkUnit};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Narrow persistence interface behind the scheduler
///
/// Implementations use interior mutability; callers share them via `Arc`.
pub trait Repository: Send + Sync {
    /// All accounts, in stable insertion order
    fn load_accounts(&self) -> StoreResult<Vec<Account>>;

    /// Insert or update one account
    fn save_account(&self, account: &Account) -> StoreResult<()>;

    /// All proxies, in stable insertion order
    fn load_proxies(&self) -> StoreResult<Vec<Proxy>>;

    /// Insert or update one proxy
    fn save_proxy(&self, proxy: &Proxy) -> StoreResult<()>;

    fn load_job(&self, job_id: &str) -> StoreResult<Job>;

    /// All jobs, newest first
    fn load_jobs(&self) -> StoreResult<Vec<Job>>;

    fn save_job(&self, job: &Job) -> StoreResult<()>;

    /// Delete a job and all of its work units (cascade)
    fn delete_job(&self, job_id: &str) -> StoreResult<()>;

    /// Non-terminal (pending or processing) units for a job, in submission
    /// order; processing units show up here so a crashed run can requeue them
    fn load_pending_units(&self, job_id: &str) -> StoreResult<Vec<WorkUnit>>;

    /// Insert or update one work unit
    fn save_unit(&self, unit: &WorkUnit) -> StoreResult<()>;

    /// Zero `requests_today` on every account; invoked by an external
    /// scheduled task, never by the scheduler itself
    fn reset_daily_counters(&self) -> StoreResult<()>;
}
