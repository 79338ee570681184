//! Job queue
//!
//! Holds the ordered work units per job, their retry counters, and the job
//! state machines. Workers check units out, execute, and report back; the
//! queue decides retry versus terminal failure and keeps the aggregate
//! counters consistent on every transition.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus, UnitStatus, WorkUnit, now_ms};
use crate::error::DispatchError;
use crate::exec::ErrorKind;
use crate::pool::SelectionStrategy;
use crate::store::Repository;

/// Outcome of one execution attempt, as reported by a worker
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Success {
        processing_time_ms: u64,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        processing_time_ms: u64,
    },
}

/// A unit handed to a worker for execution
#[derive(Debug, Clone)]
pub struct CheckedOutUnit {
    pub job_id: String,
    pub unit_id: String,
    pub url: String,
    pub strategy: SelectionStrategy,
}

struct JobEntry {
    job: Job,

    /// Unit ids ready for dispatch, in submission order; retries requeue
    /// at the back
    ready: VecDeque<String>,

    /// Live (pending or processing) units; terminal units are dropped
    /// after their counters land
    units: HashMap<String, WorkUnit>,
}

struct QueueInner {
    jobs: HashMap<String, JobEntry>,

    /// Job ids in submission order, for fair checkout scanning
    order: Vec<String>,
}

/// The JobQueue feeds workers and tracks job/unit state machines.
pub struct JobQueue {
    repo: Arc<dyn Repository>,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    /// Create a queue, restoring any non-terminal jobs from the repository
    pub fn new(repo: Arc<dyn Repository>) -> Result<Self, DispatchError> {
        let mut inner = QueueInner {
            jobs: HashMap::new(),
            order: Vec::new(),
        };

        let mut restored = repo.load_jobs()?;
        restored.sort_by_key(|j| j.created_at);
        for job in restored {
            if job.status.is_terminal() {
                continue;
            }
            let mut pending = repo.load_pending_units(&job.id)?;
            // A unit in flight when the process died restarts from pending
            for unit in &mut pending {
                if unit.status == UnitStatus::Processing {
                    unit.status = UnitStatus::Pending;
                }
            }
            debug!(job_id = %job.id, units = pending.len(), "JobQueue::new: restored job");
            let ready: VecDeque<String> = pending.iter().map(|u| u.id.clone()).collect();
            let units: HashMap<String, WorkUnit> = pending.into_iter().map(|u| (u.id.clone(), u)).collect();
            inner.order.push(job.id.clone());
            inner.jobs.insert(job.id.clone(), JobEntry { job, ready, units });
        }

        Ok(Self {
            repo,
            inner: Mutex::new(inner),
            notify: Notify::new(),
        })
    }

    /// Submit a new job; returns its id
    pub fn submit_job(
        &self,
        name: &str,
        urls: Vec<String>,
        strategy: SelectionStrategy,
        max_retries: u32,
    ) -> Result<String, DispatchError> {
        if urls.is_empty() {
            return Err(DispatchError::JobFatal("job has no urls".to_string()));
        }

        let job = Job::new(name, urls.len() as u32, strategy, max_retries);
        self.repo.save_job(&job)?;

        let mut ready = VecDeque::with_capacity(urls.len());
        let mut units = HashMap::with_capacity(urls.len());
        for url in urls {
            let unit = WorkUnit::new(&job.id, url, max_retries);
            self.repo.save_unit(&unit)?;
            ready.push_back(unit.id.clone());
            units.insert(unit.id.clone(), unit);
        }

        info!(job_id = %job.id, name, total_urls = job.progress.total_urls, %strategy, "Job submitted");
        let job_id = job.id.clone();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.order.push(job_id.clone());
            inner.jobs.insert(job_id.clone(), JobEntry { job, ready, units });
        }
        self.notify.notify_waiters();
        Ok(job_id)
    }

    /// Check out the next dispatchable unit, if any
    ///
    /// Scans jobs in submission order; paused and terminal jobs are
    /// skipped. A pending job with ready units starts running here.
    pub fn checkout(&self) -> Option<CheckedOutUnit> {
        let now = now_ms();
        let mut inner = self.inner.lock().unwrap();
        let QueueInner { jobs, order } = &mut *inner;

        for job_id in order.iter() {
            let Some(entry) = jobs.get_mut(job_id) else { continue };
            match entry.job.status {
                JobStatus::Paused | JobStatus::Completed | JobStatus::Failed => continue,
                JobStatus::Pending | JobStatus::Running => {}
            }
            let Some(unit_id) = entry.ready.pop_front() else { continue };

            if entry.job.status == JobStatus::Pending {
                entry.job.status = JobStatus::Running;
                entry.job.started_at = Some(now);
                info!(job_id = %entry.job.id, "Job started");
                self.persist_job(&entry.job);
            }

            let unit = entry.units.get_mut(&unit_id).expect("ready unit must exist");
            unit.status = UnitStatus::Processing;
            self.persist_unit(unit);

            debug!(job_id = %entry.job.id, unit_id = %unit.id, url = %unit.url, "JobQueue::checkout: dispatched");
            return Some(CheckedOutUnit {
                job_id: entry.job.id.clone(),
                unit_id: unit.id.clone(),
                url: unit.url.clone(),
                strategy: entry.job.strategy,
            });
        }
        None
    }

    /// Check out the next unit, waiting for one to become ready
    ///
    /// Returns `None` once every job is terminal, which lets batch workers
    /// drain and exit.
    pub async fn checkout_wait(&self) -> Option<CheckedOutUnit> {
        loop {
            if let Some(unit) = self.checkout() {
                return Some(unit);
            }
            if self.all_terminal() {
                return None;
            }
            // Bounded retry alongside the notification, so a wakeup lost to
            // the gap between checkout and notified() cannot stall a worker
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }

    /// Report the outcome of a checked-out unit
    ///
    /// Failures with retry budget left revert the unit to pending at the
    /// back of the queue; exhausted units are terminal. The owning job
    /// completes once every unit is terminal.
    pub fn report_unit(
        &self,
        job_id: &str,
        unit_id: &str,
        account_id: &str,
        proxy_id: Option<&str>,
        outcome: UnitOutcome,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            warn!(%job_id, %unit_id, "JobQueue::report_unit: unknown job");
            return;
        };
        let JobEntry { job, ready, units } = entry;
        let Some(unit) = units.get_mut(unit_id) else {
            warn!(%job_id, %unit_id, "JobQueue::report_unit: unknown unit");
            return;
        };

        unit.last_account_id = Some(account_id.to_string());
        unit.last_proxy_id = proxy_id.map(str::to_string);

        let mut terminal_unit = None;
        match outcome {
            UnitOutcome::Success { processing_time_ms } => {
                unit.status = UnitStatus::Completed;
                unit.last_error = None;
                unit.processing_time_ms = Some(processing_time_ms);
                job.progress.processed += 1;
                job.progress.successful += 1;
                job.progress.pending -= 1;
                debug!(%job_id, %unit_id, "JobQueue::report_unit: completed");
                terminal_unit = Some(unit.clone());
            }
            UnitOutcome::Failure {
                kind,
                message,
                processing_time_ms,
            } => {
                unit.last_error = Some(format!("{}: {}", kind, message));
                unit.processing_time_ms = Some(processing_time_ms);
                if unit.can_retry() {
                    unit.retries += 1;
                    unit.status = UnitStatus::Pending;
                    debug!(%job_id, %unit_id, retries = unit.retries, "JobQueue::report_unit: requeued for retry");
                    let requeued = unit.clone();
                    ready.push_back(unit_id.to_string());
                    self.persist_unit(&requeued);
                } else {
                    unit.status = UnitStatus::Failed;
                    job.progress.processed += 1;
                    job.progress.failed += 1;
                    job.progress.pending -= 1;
                    info!(%job_id, %unit_id, retries = unit.retries, "Unit failed permanently");
                    terminal_unit = Some(unit.clone());
                }
            }
        }

        debug_assert!(job.progress.is_consistent());

        if let Some(unit) = terminal_unit {
            units.remove(unit_id);
            self.persist_unit(&unit);

            // Complete the job once every unit is terminal; a job only
            // fails via fail_job, unit failures alone never abort it
            if job.progress.processed == job.progress.total_urls && !job.status.is_terminal() {
                job.status = JobStatus::Completed;
                job.completed_at = Some(now_ms());
                info!(
                    %job_id,
                    successful = job.progress.successful,
                    failed = job.progress.failed,
                    "Job completed"
                );
            }
        }
        self.persist_job(job);
        drop(inner);

        self.notify.notify_waiters();
    }

    /// Pause a running job
    ///
    /// In-flight units finish naturally; only new checkouts are suppressed.
    pub fn pause_job(&self, job_id: &str) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.jobs.get_mut(job_id).ok_or_else(|| DispatchError::UnknownJob(job_id.to_string()))?;
        if entry.job.status != JobStatus::Running {
            return Err(DispatchError::InvalidJobState {
                id: job_id.to_string(),
                status: entry.job.status,
                action: "paused",
            });
        }
        entry.job.status = JobStatus::Paused;
        entry.job.paused_at = Some(now_ms());
        info!(%job_id, "Job paused");
        self.persist_job(&entry.job);
        Ok(())
    }

    /// Resume a paused job
    pub fn resume_job(&self, job_id: &str) -> Result<(), DispatchError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.jobs.get_mut(job_id).ok_or_else(|| DispatchError::UnknownJob(job_id.to_string()))?;
            if entry.job.status != JobStatus::Paused {
                return Err(DispatchError::InvalidJobState {
                    id: job_id.to_string(),
                    status: entry.job.status,
                    action: "resumed",
                });
            }
            entry.job.status = JobStatus::Running;
            entry.job.resumed_at = Some(now_ms());
            info!(%job_id, "Job resumed");
            self.persist_job(&entry.job);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Abort a whole job with a fatal error
    ///
    /// Reserved for conditions that make progress impossible, never for
    /// ordinary unit failures.
    pub fn fail_job(&self, job_id: &str, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            warn!(%job_id, "JobQueue::fail_job: unknown job");
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }
        entry.job.status = JobStatus::Failed;
        entry.job.error = Some(message.to_string());
        entry.job.completed_at = Some(now_ms());
        entry.ready.clear();
        warn!(%job_id, %message, "Job failed");
        self.persist_job(&entry.job);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Flag a job as waiting for account capacity, surfaced in status output
    pub fn set_waiting_for_capacity(&self, job_id: &str, waiting: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.jobs.get_mut(job_id)
            && entry.job.waiting_for_capacity != waiting
        {
            entry.job.waiting_for_capacity = waiting;
            self.persist_job(&entry.job);
        }
    }

    /// Current state of one job
    pub fn job_status(&self, job_id: &str) -> Result<Job, DispatchError> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| DispatchError::UnknownJob(job_id.to_string()))
    }

    /// All queued jobs, in submission order
    pub fn jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).map(|e| e.job.clone()))
            .collect()
    }

    /// Whether every job has reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .values()
            .all(|e| e.job.status.is_terminal())
    }

    fn persist_job(&self, job: &Job) {
        if let Err(e) = self.repo.save_job(job) {
            warn!(job_id = %job.id, error = %e, "Failed to persist job state");
        }
    }

    fn persist_unit(&self, unit: &WorkUnit) {
        if let Err(e) = self.repo.save_unit(unit) {
            warn!(unit_id = %unit.id, error = %e, "Failed to persist unit state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryRepository::new())).unwrap()
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://example.com/p/{}", i)).collect()
    }

    fn success() -> UnitOutcome {
        UnitOutcome::Success { processing_time_ms: 10 }
    }

    fn failure() -> UnitOutcome {
        UnitOutcome::Failure {
            kind: ErrorKind::Network,
            message: "timeout".to_string(),
            processing_time_ms: 10,
        }
    }

    #[test]
    fn test_empty_job_rejected() {
        let q = queue();
        assert!(matches!(
            q.submit_job("empty", vec![], SelectionStrategy::RoundRobin, 1),
            Err(DispatchError::JobFatal(_))
        ));
    }

    #[test]
    fn test_checkout_in_submission_order() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(3), SelectionStrategy::RoundRobin, 0).unwrap();

        let first = q.checkout().unwrap();
        assert_eq!(first.url, "https://example.com/p/0");
        assert_eq!(first.job_id, job_id);
        assert_eq!(q.checkout().unwrap().url, "https://example.com/p/1");

        // Checkout started the job
        assert_eq!(q.job_status(&job_id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_counters_consistent_through_lifecycle() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(3), SelectionStrategy::RoundRobin, 0).unwrap();

        let u1 = q.checkout().unwrap();
        q.report_unit(&job_id, &u1.unit_id, "a1", None, success());
        let job = q.job_status(&job_id).unwrap();
        assert!(job.progress.is_consistent());
        assert_eq!(job.progress.processed, 1);
        assert_eq!(job.progress.pending, 2);

        let u2 = q.checkout().unwrap();
        q.report_unit(&job_id, &u2.unit_id, "a1", None, failure());
        let job = q.job_status(&job_id).unwrap();
        assert!(job.progress.is_consistent());
        assert_eq!(job.progress.failed, 1);

        let u3 = q.checkout().unwrap();
        q.report_unit(&job_id, &u3.unit_id, "a1", None, success());

        let job = q.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.successful, 2);
        assert_eq!(job.progress.failed, 1);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_retry_requeues_at_back() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(2), SelectionStrategy::RoundRobin, 2).unwrap();

        let u1 = q.checkout().unwrap();
        q.report_unit(&job_id, &u1.unit_id, "a1", None, failure());

        // Counters unchanged: a retried unit is still pending
        let job = q.job_status(&job_id).unwrap();
        assert_eq!(job.progress.processed, 0);
        assert_eq!(job.progress.pending, 2);

        // The other unit dispatches first; the retry comes after
        assert_eq!(q.checkout().unwrap().url, "https://example.com/p/1");
        let retried = q.checkout().unwrap();
        assert_eq!(retried.unit_id, u1.unit_id);
    }

    #[test]
    fn test_retry_exhaustion_is_terminal() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(1), SelectionStrategy::RoundRobin, 2).unwrap();

        // max_retries = 2: three failures total, then terminal
        for _ in 0..3 {
            let unit = q.checkout().unwrap();
            q.report_unit(&job_id, &unit.unit_id, "a1", None, failure());
        }

        // Not requeued a fourth time
        assert!(q.checkout().is_none());
        let job = q.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.failed, 1);
        assert!(job.progress.is_consistent());
    }

    #[test]
    fn test_pause_suppresses_new_checkouts_only() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(7), SelectionStrategy::RoundRobin, 0).unwrap();

        // Two units in flight, five pending
        let in_flight = [q.checkout().unwrap(), q.checkout().unwrap()];
        q.pause_job(&job_id).unwrap();

        // Pending units are not dispatched while paused
        assert!(q.checkout().is_none());

        // In-flight units finish naturally and their counters land
        for unit in &in_flight {
            q.report_unit(&job_id, &unit.unit_id, "a1", None, success());
        }
        let job = q.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.progress.processed, 2);
        assert_eq!(job.progress.pending, 5);

        q.resume_job(&job_id).unwrap();
        assert!(q.checkout().is_some());
        assert_eq!(q.job_status(&job_id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_pause_requires_running() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(1), SelectionStrategy::RoundRobin, 0).unwrap();
        assert!(matches!(
            q.pause_job(&job_id),
            Err(DispatchError::InvalidJobState { .. })
        ));
        assert!(matches!(q.resume_job(&job_id), Err(DispatchError::InvalidJobState { .. })));
        assert!(matches!(q.pause_job("nope"), Err(DispatchError::UnknownJob(_))));
    }

    #[test]
    fn test_fail_job_is_terminal_and_clears_ready() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(3), SelectionStrategy::RoundRobin, 0).unwrap();
        q.checkout().unwrap();

        q.fail_job(&job_id, "no accounts configured");
        let job = q.job_status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("no accounts configured"));
        assert!(q.checkout().is_none());
        assert!(q.all_terminal());
    }

    #[test]
    fn test_restores_unfinished_jobs() {
        let repo = Arc::new(MemoryRepository::new());
        let job_id = {
            let q = JobQueue::new(Arc::clone(&repo) as Arc<dyn Repository>).unwrap();
            let job_id = q.submit_job("crawl", urls(2), SelectionStrategy::Random, 1).unwrap();
            let unit = q.checkout().unwrap();
            q.report_unit(&job_id, &unit.unit_id, "a1", None, success());
            job_id
        };

        let q = JobQueue::new(repo).unwrap();
        let unit = q.checkout().unwrap();
        assert_eq!(unit.job_id, job_id);
        assert_eq!(unit.url, "https://example.com/p/1");
        assert_eq!(unit.strategy, SelectionStrategy::Random);
    }

    #[test]
    fn test_restores_in_flight_unit_as_pending() {
        let repo = Arc::new(MemoryRepository::new());
        let (job_id, unit_id) = {
            let q = JobQueue::new(Arc::clone(&repo) as Arc<dyn Repository>).unwrap();
            let job_id = q.submit_job("crawl", urls(1), SelectionStrategy::RoundRobin, 0).unwrap();
            // Checked out but never reported, as if the process died here
            let unit = q.checkout().unwrap();
            (job_id, unit.unit_id)
        };

        let q = JobQueue::new(repo).unwrap();
        let unit = q.checkout().unwrap();
        assert_eq!(unit.job_id, job_id);
        assert_eq!(unit.unit_id, unit_id);
    }

    #[test]
    fn test_waiting_for_capacity_flag() {
        let q = queue();
        let job_id = q.submit_job("crawl", urls(1), SelectionStrategy::RoundRobin, 0).unwrap();
        q.set_waiting_for_capacity(&job_id, true);
        assert!(q.job_status(&job_id).unwrap().waiting_for_capacity);
        q.set_waiting_for_capacity(&job_id, false);
        assert!(!q.job_status(&job_id).unwrap().waiting_for_capacity);
    }

    #[tokio::test]
    async fn test_checkout_wait_drains_and_exits() {
        let q = Arc::new(queue());
        let job_id = q.submit_job("crawl", urls(1), SelectionStrategy::RoundRobin, 0).unwrap();

        let unit = q.checkout_wait().await.unwrap();
        q.report_unit(&job_id, &unit.unit_id, "a1", None, success());

        // Everything terminal: workers get None and can exit
        assert!(q.checkout_wait().await.is_none());
    }
}
