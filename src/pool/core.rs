//! Account pool implementation
//!
//! The single serialization point for the shared account set. All claim and
//! release operations go through one mutex, so only one caller can ever flip
//! a given account's busy flag from false to true. Claims are handed out as
//! guard values: dropping a claim without reporting an outcome still clears
//! the busy flag, so a crashed worker cannot strand an account.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{Account, Credential, HealthTransition, now_ms};
use crate::error::DispatchError;
use crate::exec::{ErrorKind, Validation};
use crate::store::{Repository, StoreResult};

use super::config::PoolConfig;
use super::strategy::{SelectionStrategy, select_index};

/// Outcome reported when a claim is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Success,
    Failure(ErrorKind),
}

/// Why no account could be claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The pool has zero accounts configured; a fatal condition
    NoneConfigured,
    /// Accounts exist but all are busy, cooling down, blocked, or over quota
    NoneEligible,
}

/// Result of one acquire attempt
pub enum AcquireResult {
    Claimed(AccountClaim),
    Unavailable(UnavailableReason),
}

/// Counters kept across the pool's lifetime
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub total_claims: u64,
    pub total_releases: u64,
    pub successes: u64,
    pub failures: u64,
    pub cooldowns_entered: u64,
    pub blocks_entered: u64,
}

/// Internal state protected by mutex
struct PoolInner {
    accounts: Vec<Account>,

    /// Round-robin pointer, advances past each pick
    rr_cursor: usize,

    /// Next claim token; tokens make late releases detectable
    next_token: u64,

    /// Active claims: account id to claim token
    claims: HashMap<String, u64>,

    stats: PoolStats,
}

/// The AccountPool allocates eligible accounts to workers, one in-flight
/// claim per account, and applies health transitions on release.
pub struct AccountPool {
    config: PoolConfig,
    repo: Arc<dyn Repository>,
    inner: Mutex<PoolInner>,
    notify: Notify,
}

impl AccountPool {
    /// Create a pool over the accounts currently in the repository
    pub fn new(config: PoolConfig, repo: Arc<dyn Repository>) -> StoreResult<Self> {
        let mut accounts = repo.load_accounts()?;
        // A claim interrupted by a crash must not survive a restart
        for account in &mut accounts {
            account.busy = false;
        }
        debug!(count = accounts.len(), "AccountPool::new: loaded accounts");
        Ok(Self {
            config,
            repo,
            inner: Mutex::new(PoolInner {
                accounts,
                rr_cursor: 0,
                next_token: 1,
                claims: HashMap::new(),
                stats: PoolStats::default(),
            }),
            notify: Notify::new(),
        })
    }

    /// Attempt to claim an eligible account
    ///
    /// Atomic with respect to concurrent callers: eligibility check and the
    /// busy transition happen under one lock.
    pub fn acquire(self: &Arc<Self>, strategy: SelectionStrategy) -> AcquireResult {
        let now = now_ms();
        let mut inner = self.inner.lock().unwrap();

        if inner.accounts.is_empty() {
            debug!("AccountPool::acquire: no accounts configured");
            return AcquireResult::Unavailable(UnavailableReason::NoneConfigured);
        }

        // Lazy window expiry before the eligibility scan
        let mut refreshed = Vec::new();
        for account in &mut inner.accounts {
            if account.refresh(now) {
                debug!(account_id = %account.id, "AccountPool::acquire: cooldown/block expired");
                refreshed.push(account.clone());
            }
        }
        for account in &refreshed {
            self.persist(account);
        }

        let PoolInner {
            accounts, rr_cursor, ..
        } = &mut *inner;

        let Some(idx) = select_index(
            strategy,
            accounts.len(),
            rr_cursor,
            |i| accounts[i].is_eligible(now),
            |i| accounts[i].requests_today as u64,
        ) else {
            debug!(%strategy, "AccountPool::acquire: no eligible account");
            return AcquireResult::Unavailable(UnavailableReason::NoneEligible);
        };

        inner.accounts[idx].busy = true;
        let account = inner.accounts[idx].clone();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.claims.insert(account.id.clone(), token);
        inner.stats.total_claims += 1;
        self.persist(&account);

        debug!(account_id = %account.id, token, %strategy, "AccountPool::acquire: claimed");
        AcquireResult::Claimed(AccountClaim {
            pool: Arc::clone(self),
            account,
            token,
        })
    }

    /// Claim an eligible account, waiting until one becomes available
    ///
    /// Backs off on a bounded interval rather than busy-looping; wakes early
    /// when a release opens capacity. An empty pool is fatal.
    pub async fn acquire_wait(self: &Arc<Self>, strategy: SelectionStrategy) -> Result<AccountClaim, DispatchError> {
        loop {
            match self.acquire(strategy) {
                AcquireResult::Claimed(claim) => return Ok(claim),
                AcquireResult::Unavailable(UnavailableReason::NoneConfigured) => {
                    return Err(DispatchError::JobFatal("no accounts configured".to_string()));
                }
                AcquireResult::Unavailable(UnavailableReason::NoneEligible) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.config.acquire_retry()) => {}
                    }
                }
            }
        }
    }

    /// Settle a claim: clear busy and apply the outcome transition
    ///
    /// Idempotent per claim: a stale or repeated token is a no-op, so a late
    /// drop after an explicit release cannot double-apply counters. Returns
    /// whether the claim was still live.
    fn complete_claim(&self, account_id: &str, token: u64, outcome: Option<ClaimOutcome>) -> bool {
        let now = now_ms();
        let mut inner = self.inner.lock().unwrap();

        if inner.claims.get(account_id) != Some(&token) {
            debug!(%account_id, token, "AccountPool::complete_claim: stale token, ignoring");
            return false;
        }
        inner.claims.remove(account_id);

        let policy = &self.config.health;
        let PoolInner { accounts, stats, .. } = &mut *inner;
        let Some(account) = accounts.iter_mut().find(|a| a.id == account_id) else {
            warn!(%account_id, "AccountPool::complete_claim: account vanished");
            return false;
        };

        account.busy = false;
        match outcome {
            Some(ClaimOutcome::Success) => {
                account.record_success(now);
                stats.successes += 1;
            }
            Some(ClaimOutcome::Failure(kind)) => {
                let ban_signal = kind == ErrorKind::Blocked;
                let transition = account.record_failure(ban_signal, now, policy);
                stats.failures += 1;
                match transition {
                    HealthTransition::Cooldown => {
                        stats.cooldowns_entered += 1;
                        info!(%account_id, %kind, "Account entered cooldown");
                    }
                    HealthTransition::Blocked => {
                        stats.blocks_entered += 1;
                        warn!(%account_id, %kind, "Account blocked");
                    }
                    HealthTransition::None => {}
                }
            }
            // Abandoned claim: the worker went away without an outcome.
            // Free the account but leave its counters untouched.
            None => {
                debug!(%account_id, token, "AccountPool::complete_claim: claim abandoned");
            }
        }
        stats.total_releases += 1;

        let snapshot = inner.accounts.iter().find(|a| a.id == account_id).cloned();
        drop(inner);
        if let Some(account) = snapshot {
            self.persist(&account);
        }

        self.notify.notify_waiters();
        true
    }

    /// Register a new account
    pub fn add_account(&self, account: Account) -> StoreResult<()> {
        self.repo.save_account(&account)?;
        info!(account_id = %account.id, status = %account.status, "Account added");
        self.inner.lock().unwrap().accounts.push(account);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Feed a validation verdict from the external credential check
    pub fn apply_validation(&self, account_id: &str, validation: &Validation) -> StoreResult<()> {
        let now = now_ms();
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            let account = inner.accounts.iter_mut().find(|a| a.id == account_id);
            match account {
                Some(account) => {
                    account.apply_validation(validation.valid, now);
                    info!(%account_id, valid = validation.valid, status = %account.status, "Validation applied");
                    Some(account.clone())
                }
                None => None,
            }
        };
        if let Some(account) = snapshot {
            self.repo.save_account(&account)?;
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Administrative reset: back to active, failure history cleared
    pub fn admin_reset(&self, account_id: &str) -> StoreResult<()> {
        let now = now_ms();
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            let account = inner.accounts.iter_mut().find(|a| a.id == account_id);
            match account {
                Some(account) => {
                    account.admin_reset(now);
                    info!(%account_id, "Account reset");
                    Some(account.clone())
                }
                None => None,
            }
        };
        if let Some(account) = snapshot {
            self.repo.save_account(&account)?;
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Snapshot of all accounts
    pub fn accounts(&self) -> Vec<Account> {
        self.inner.lock().unwrap().accounts.clone()
    }

    /// Pool lifetime statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().unwrap().stats.clone()
    }

    /// Write-through persistence is best-effort: the in-memory pool stays
    /// authoritative for the run, a failed write only loses durability.
    fn persist(&self, account: &Account) {
        if let Err(e) = self.repo.save_account(account) {
            warn!(account_id = %account.id, error = %e, "Failed to persist account state");
        }
    }
}

/// A live claim on one account
///
/// Scoped-acquisition discipline: the claim releases on every exit path.
/// Call [`AccountClaim::release`] with the outcome on the normal path; a
/// plain drop (panic, cancellation) frees the account without touching its
/// health counters.
pub struct AccountClaim {
    pool: Arc<AccountPool>,
    account: Account,
    token: u64,
}

impl AccountClaim {
    pub fn account_id(&self) -> &str {
        &self.account.id
    }

    pub fn credential(&self) -> &Credential {
        &self.account.credential
    }

    /// Release the claim, applying the outcome's health transition
    pub fn release(self, outcome: ClaimOutcome) {
        self.pool.complete_claim(&self.account.id, self.token, Some(outcome));
        // The Drop impl then sees a stale token and does nothing
    }
}

impl Drop for AccountClaim {
    fn drop(&mut self) {
        self.pool.complete_claim(&self.account.id, self.token, None);
    }
}
