//! Proxy rotator
//!
//! The account pool's smaller sibling: picks a network egress point with
//! the same selection strategies and tracks per-proxy failure stats.
//! Unlike account cooldown, proxy exclusion is sticky; only an explicit
//! reset clears it.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::domain::Proxy;
use crate::store::{Repository, StoreResult};

use super::strategy::{SelectionStrategy, select_index};

struct RotatorInner {
    proxies: Vec<Proxy>,
    rr_cursor: usize,
}

/// Rotates a shared set of proxies; proxies may serve several concurrent
/// workers at once.
pub struct ProxyRotator {
    max_failures: u32,
    repo: Arc<dyn Repository>,
    inner: Mutex<RotatorInner>,
}

impl ProxyRotator {
    /// Create a rotator over the proxies currently in the repository
    pub fn new(max_failures: u32, repo: Arc<dyn Repository>) -> StoreResult<Self> {
        let proxies = repo.load_proxies()?;
        debug!(count = proxies.len(), "ProxyRotator::new: loaded proxies");
        Ok(Self {
            max_failures,
            repo,
            inner: Mutex::new(RotatorInner {
                proxies,
                rr_cursor: 0,
            }),
        })
    }

    /// Register a new proxy
    pub fn add_proxy(&self, proxy: Proxy) -> StoreResult<()> {
        self.repo.save_proxy(&proxy)?;
        info!(proxy_id = %proxy.id, url = %proxy.url(), "Proxy added");
        self.inner.lock().unwrap().proxies.push(proxy);
        Ok(())
    }

    /// Pick the next proxy for an execution
    ///
    /// Returns `None` only when the pool is empty. When every proxy is
    /// excluded, degrades to the first proxy in the pool: callers must
    /// treat the pick as best-effort, not a connectivity guarantee.
    pub fn next_proxy(&self, strategy: SelectionStrategy) -> Option<Proxy> {
        let mut inner = self.inner.lock().unwrap();
        let RotatorInner { proxies, rr_cursor } = &mut *inner;

        if proxies.is_empty() {
            return None;
        }

        match select_index(
            strategy,
            proxies.len(),
            rr_cursor,
            |i| !proxies[i].is_failed,
            |i| proxies[i].requests,
        ) {
            Some(idx) => Some(proxies[idx].clone()),
            None => {
                warn!("ProxyRotator::next_proxy: all proxies excluded, falling back to first");
                proxies.first().cloned()
            }
        }
    }

    /// Record a successful request through a proxy
    pub fn mark_success(&self, proxy_id: &str, response_time_ms: u64) {
        self.update(proxy_id, |proxy| proxy.record_success(response_time_ms));
    }

    /// Record a failed request; excludes the proxy once failures cross the
    /// configured maximum
    pub fn mark_failed(&self, proxy_id: &str) {
        let max_failures = self.max_failures;
        self.update(proxy_id, |proxy| {
            proxy.record_failure(max_failures);
            if proxy.is_failed {
                info!(%proxy_id, failures = proxy.failure_count, "Proxy excluded from rotation");
            }
        });
    }

    /// Manual recovery: clear the exclusion set and all failure counters
    pub fn reset_failed_proxies(&self) -> StoreResult<()> {
        let snapshots: Vec<Proxy> = {
            let mut inner = self.inner.lock().unwrap();
            for proxy in &mut inner.proxies {
                proxy.reset();
            }
            inner.proxies.clone()
        };
        for proxy in &snapshots {
            self.repo.save_proxy(proxy)?;
        }
        info!(count = snapshots.len(), "Reset all proxy failure state");
        Ok(())
    }

    /// Snapshot of all proxies
    pub fn proxies(&self) -> Vec<Proxy> {
        self.inner.lock().unwrap().proxies.clone()
    }

    fn update(&self, proxy_id: &str, f: impl FnOnce(&mut Proxy)) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            match inner.proxies.iter_mut().find(|p| p.id == proxy_id) {
                Some(proxy) => {
                    f(proxy);
                    Some(proxy.clone())
                }
                None => {
                    warn!(%proxy_id, "ProxyRotator::update: unknown proxy");
                    None
                }
            }
        };
        if let Some(proxy) = snapshot
            && let Err(e) = self.repo.save_proxy(&proxy)
        {
            warn!(%proxy_id, error = %e, "Failed to persist proxy state");
        }
    }
}
