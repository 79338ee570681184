//! Dispatcher - bounded worker pool driving execution
//!
//! Workers pull units from the queue, claim an account from the pool, pace
//! themselves through the rate limiters, hand off to the executor, and
//! report the outcome back. Executor failures are classified and recovered
//! here; they never propagate upward. Only whole-job fatal conditions (an
//! empty account pool) abort a job.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::exec::{ExecReport, Executor};
use crate::pool::{AccountPool, AcquireResult, ClaimOutcome, ProxyRotator, UnavailableReason};
use crate::rate::RateLimiter;

use super::jobs::{CheckedOutUnit, JobQueue, UnitOutcome};

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Concurrent worker count
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Grace period for in-flight units on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// The Dispatcher owns the worker pool and wires the queue, account pool,
/// proxy rotator, rate limiters, and executor together.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<JobQueue>,
    pool: Arc<AccountPool>,
    rotator: Arc<ProxyRotator>,
    executor: Arc<dyn Executor>,
    /// Execution-layer pacing, keyed by proxy
    exec_rate: Arc<RateLimiter>,
    /// Account-layer pacing, keyed by account
    account_rate: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<JobQueue>,
        pool: Arc<AccountPool>,
        rotator: Arc<ProxyRotator>,
        executor: Arc<dyn Executor>,
        exec_rate: Arc<RateLimiter>,
        account_rate: Arc<RateLimiter>,
    ) -> Self {
        debug!(workers = config.workers, "Dispatcher::new: called");
        Self {
            config,
            queue,
            pool,
            rotator,
            executor,
            exec_rate,
            account_rate,
        }
    }

    /// Run workers until every job is terminal or a shutdown signal arrives
    ///
    /// On shutdown, in-flight units get the configured grace period, then
    /// remaining workers are aborted; aborted claims are freed by the claim
    /// guard's drop.
    pub async fn run_to_completion(self: &Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let worker_count = self.config.workers.max(1);
        info!(workers = worker_count, "Dispatcher starting");

        let handles: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker_id| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.worker_loop(worker_id).await })
            })
            .collect();

        loop {
            if handles.iter().all(|h| h.is_finished()) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, draining workers");
                    let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
                    while !handles.iter().all(|h| h.is_finished())
                        && tokio::time::Instant::now() < deadline
                    {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    let stuck = handles.iter().filter(|h| !h.is_finished()).count();
                    if stuck > 0 {
                        warn!(stuck, "Aborting workers after drain timeout");
                        for handle in &handles {
                            handle.abort();
                        }
                    }
                    break;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("Dispatcher stopped");
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Dispatcher::worker_loop: started");
        while let Some(unit) = self.queue.checkout_wait().await {
            self.process_unit(worker_id, unit).await;
        }
        debug!(worker_id, "Dispatcher::worker_loop: queue drained, exiting");
    }

    async fn process_unit(&self, worker_id: usize, unit: CheckedOutUnit) {
        // Claim an account; starvation keeps the job running but visible
        let claim = match self.pool.acquire(unit.strategy) {
            AcquireResult::Claimed(claim) => claim,
            AcquireResult::Unavailable(UnavailableReason::NoneConfigured) => {
                self.queue.fail_job(&unit.job_id, "no accounts configured");
                return;
            }
            AcquireResult::Unavailable(UnavailableReason::NoneEligible) => {
                debug!(worker_id, job_id = %unit.job_id, "Dispatcher::process_unit: waiting for capacity");
                self.queue.set_waiting_for_capacity(&unit.job_id, true);
                let result = self.pool.acquire_wait(unit.strategy).await;
                self.queue.set_waiting_for_capacity(&unit.job_id, false);
                match result {
                    Ok(claim) => claim,
                    Err(DispatchError::JobFatal(msg)) => {
                        self.queue.fail_job(&unit.job_id, &msg);
                        return;
                    }
                    Err(e) => {
                        warn!(worker_id, error = %e, "Dispatcher::process_unit: acquire failed");
                        self.queue.fail_job(&unit.job_id, &e.to_string());
                        return;
                    }
                }
            }
        };

        self.account_rate.wait_for_next(claim.account_id()).await;

        let proxy = self.rotator.next_proxy(unit.strategy);
        let rate_key = proxy.as_ref().map(|p| p.id.clone()).unwrap_or_else(|| "direct".to_string());
        self.exec_rate.wait_for_next(&rate_key).await;

        debug!(
            worker_id,
            unit_id = %unit.unit_id,
            url = %unit.url,
            account_id = %claim.account_id(),
            proxy = proxy.as_ref().map(|p| p.url()).unwrap_or_else(|| "direct".to_string()),
            "Dispatcher::process_unit: executing"
        );

        let started = std::time::Instant::now();
        let report = self.executor.execute(&unit.url, claim.credential(), proxy.as_ref()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let account_id = claim.account_id().to_string();
        let proxy_id = proxy.as_ref().map(|p| p.id.clone());
        let outcome = match report {
            ExecReport::Success { .. } => {
                claim.release(ClaimOutcome::Success);
                if let Some(id) = &proxy_id {
                    self.rotator.mark_success(id, elapsed_ms);
                }
                UnitOutcome::Success {
                    processing_time_ms: elapsed_ms,
                }
            }
            ExecReport::Failure { kind, message } => {
                claim.release(ClaimOutcome::Failure(kind));
                // Only transport failures count against the proxy
                if kind == crate::exec::ErrorKind::Network
                    && let Some(id) = &proxy_id
                {
                    self.rotator.mark_failed(id);
                }
                UnitOutcome::Failure {
                    kind,
                    message,
                    processing_time_ms: elapsed_ms,
                }
            }
        };

        self.queue
            .report_unit(&unit.job_id, &unit.unit_id, &account_id, proxy_id.as_deref(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountStatus, Credential, JobStatus};
    use crate::exec::ErrorKind;
    use crate::pool::{PoolConfig, SelectionStrategy};
    use crate::rate::RateConfig;
    use crate::store::{MemoryRepository, Repository};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor that succeeds or fails per a script of outcomes keyed by URL
    struct ScriptedExecutor {
        failures: Mutex<std::collections::HashMap<String, u32>>,
        kind: ErrorKind,
    }

    impl ScriptedExecutor {
        fn always_ok() -> Self {
            Self {
                failures: Mutex::new(Default::default()),
                kind: ErrorKind::Network,
            }
        }

        fn failing(urls: &[(&str, u32)], kind: ErrorKind) -> Self {
            Self {
                failures: Mutex::new(urls.iter().map(|(u, n)| (u.to_string(), *n)).collect()),
                kind,
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            url: &str,
            _credential: &Credential,
            _proxy: Option<&crate::domain::Proxy>,
        ) -> ExecReport {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url)
                && *left > 0
            {
                *left -= 1;
                return ExecReport::failure(self.kind, "scripted failure");
            }
            ExecReport::Success {
                data: serde_json::json!({ "url": url }),
            }
        }
    }

    fn active_account(id: &str) -> Account {
        let mut acct = Account::with_id(
            id,
            Credential {
                username: format!("{}@example.com", id),
                secret: "s".to_string(),
            },
            1_000,
        );
        acct.status = AccountStatus::Active;
        acct
    }

    fn no_delay() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
        }))
    }

    fn dispatcher(accounts: Vec<Account>, executor: Arc<dyn Executor>) -> (Arc<Dispatcher>, Arc<JobQueue>, Arc<AccountPool>) {
        let repo = Arc::new(MemoryRepository::new());
        for acct in &accounts {
            repo.save_account(acct).unwrap();
        }
        let repo: Arc<dyn Repository> = repo;
        let queue = Arc::new(JobQueue::new(Arc::clone(&repo)).unwrap());
        let pool = Arc::new(AccountPool::new(PoolConfig::default(), Arc::clone(&repo)).unwrap());
        let rotator = Arc::new(ProxyRotator::new(3, Arc::clone(&repo)).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                workers: 2,
                shutdown_timeout_secs: 5,
            },
            Arc::clone(&queue),
            Arc::clone(&pool),
            rotator,
            executor,
            no_delay(),
            no_delay(),
        ));
        (dispatcher, queue, pool)
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://example.com/p/{}", i)).collect()
    }

    #[tokio::test]
    async fn test_all_success_run() {
        let (dispatcher, queue, pool) =
            dispatcher(vec![active_account("a1"), active_account("a2")], Arc::new(ScriptedExecutor::always_ok()));
        let job_id = queue
            .submit_job("crawl", urls(6), SelectionStrategy::RoundRobin, 1)
            .unwrap();

        let (_tx, rx) = mpsc::channel(1);
        dispatcher.run_to_completion(rx).await;

        let job = queue.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.successful, 6);
        assert_eq!(job.progress.failed, 0);
        assert!(job.progress.is_consistent());

        // Nothing left busy
        assert!(pool.accounts().iter().all(|a| !a.busy));
        assert_eq!(pool.stats().total_claims, pool.stats().total_releases);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let executor = Arc::new(ScriptedExecutor::failing(
            &[("https://example.com/p/0", 1)],
            ErrorKind::Network,
        ));
        let (dispatcher, queue, _pool) = dispatcher(vec![active_account("a1")], executor);
        let job_id = queue
            .submit_job("crawl", urls(2), SelectionStrategy::RoundRobin, 2)
            .unwrap();

        let (_tx, rx) = mpsc::channel(1);
        dispatcher.run_to_completion(rx).await;

        let job = queue.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.successful, 2);
        assert_eq!(job.progress.failed, 0);
    }

    #[tokio::test]
    async fn test_no_accounts_fails_job_fatally() {
        let (dispatcher, queue, _pool) = dispatcher(vec![], Arc::new(ScriptedExecutor::always_ok()));
        let job_id = queue
            .submit_job("crawl", urls(3), SelectionStrategy::Random, 1)
            .unwrap();

        let (_tx, rx) = mpsc::channel(1);
        dispatcher.run_to_completion(rx).await;

        let job = queue.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap_or("").contains("no accounts"));
    }
}
