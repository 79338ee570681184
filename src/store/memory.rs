//! In-memory repository
//!
//! Backs batch runs that need no persistence, and every test.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{Account, Job, Proxy, WorkUnit};
use crate::error::StoreError;

use super::{Repository, StoreResult};

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    proxies: Vec<Proxy>,
    jobs: Vec<Job>,
    units: HashMap<String, Vec<WorkUnit>>,
}

/// Repository keeping everything in process memory
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn load_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    fn save_account(&self, account: &Account) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account.clone(),
            None => state.accounts.push(account.clone()),
        }
        Ok(())
    }

    fn load_proxies(&self) -> StoreResult<Vec<Proxy>> {
        Ok(self.state.lock().unwrap().proxies.clone())
    }

    fn save_proxy(&self, proxy: &Proxy) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.proxies.iter_mut().find(|p| p.id == proxy.id) {
            Some(existing) => *existing = proxy.clone(),
            None => state.proxies.push(proxy.clone()),
        }
        Ok(())
    }

    fn load_job(&self, job_id: &str) -> StoreResult<Job> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("job", job_id))
    }

    fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut jobs = self.state.lock().unwrap().jobs.clone();
        jobs.sort_by_key(|j| std::cmp::Reverse(j.created_at));
        Ok(jobs)
    }

    fn save_job(&self, job: &Job) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => state.jobs.push(job.clone()),
        }
        Ok(())
    }

    fn delete_job(&self, job_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.retain(|j| j.id != job_id);
        state.units.remove(job_id);
        Ok(())
    }

    fn load_pending_units(&self, job_id: &str) -> StoreResult<Vec<WorkUnit>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .get(job_id)
            .map(|units| {
                units
                    .iter()
                    .filter(|u| !u.status.is_terminal())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_unit(&self, unit: &WorkUnit) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let units = state.units.entry(unit.job_id.clone()).or_default();
        match units.iter_mut().find(|u| u.id == unit.id) {
            Some(existing) => *existing = unit.clone(),
            None => units.push(unit.clone()),
        }
        Ok(())
    }

    fn reset_daily_counters(&self) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for account in &mut state.accounts {
            account.requests_today = 0;
        }
        Ok(())
    }
}
