//! Account domain type and health state machine
//!
//! An Account is one credentialed identity usable for execution. Its health
//! evolves with execution outcomes: repeated failures push it into a
//! cooldown window (exponential backoff), hard failures or an explicit ban
//! signal push it into the blocked state. All transitions are driven by the
//! pool's claim/release path or by validation results fed through
//! [`Account::apply_validation`]; legacy booleans like "is active" are
//! derived views, never stored.

use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::now_ms;

/// Account health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Eligible for claims
    Active,
    /// Newly added, eligible but not yet confirmed valid
    #[default]
    Pending,
    /// Temporarily ineligible until `cooldown_until` elapses
    Cooldown,
    /// Ineligible until `blocked_until` elapses or a manual reset
    Blocked,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Pending => write!(f, "pending"),
            Self::Cooldown => write!(f, "cooldown"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "cooldown" => Ok(Self::Cooldown),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Unknown account status: {}", s)),
        }
    }
}

/// Credential carried by an account, handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

/// Health thresholds and backoff curve for the account state machine
///
/// The source prototypes never agreed on exact numbers, so these are
/// configuration parameters with defaults rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    /// Consecutive failures before an account enters cooldown
    pub soft_failure_threshold: u32,

    /// Consecutive failures before an account is blocked outright
    pub hard_failure_threshold: u32,

    /// Cooldown duration at the soft threshold, doubled per extra failure
    pub cooldown_base_ms: u64,

    /// Upper bound on the cooldown window
    pub cooldown_max_ms: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            soft_failure_threshold: 3,
            hard_failure_threshold: 10,
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 3_600_000,
        }
    }
}

/// Exponential backoff for the cooldown window, bounded by the policy cap
pub fn backoff_ms(consecutive_failures: u32, policy: &HealthPolicy) -> u64 {
    let exp = consecutive_failures
        .saturating_sub(policy.soft_failure_threshold)
        .min(16);
    policy
        .cooldown_base_ms
        .saturating_mul(1u64 << exp)
        .min(policy.cooldown_max_ms)
}

/// Which health transition a recorded failure triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    None,
    Cooldown,
    Blocked,
}

/// One credentialed identity usable for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: String,

    /// Owning-user reference
    pub owner: String,

    /// Credential handed to the execution collaborator
    pub credential: Credential,

    /// Current health status
    pub status: AccountStatus,

    /// Requests performed today (reset daily by an external scheduled task)
    pub requests_today: u32,

    /// Daily quota, enforced at claim time
    pub daily_request_limit: u32,

    /// Consecutive failed executions since the last success
    pub consecutive_failures: u32,

    /// Cooldown window end (unix ms), if in cooldown
    pub cooldown_until: Option<i64>,

    /// Block window end (unix ms); `None` while blocked means manual-only recovery
    pub blocked_until: Option<i64>,

    /// At most one in-flight execution per account; mutated only by the pool
    pub busy: bool,

    /// Last execution timestamp (unix ms)
    pub last_request_at: Option<i64>,

    /// Creation timestamp (unix ms)
    pub created_at: i64,

    /// Last update timestamp (unix ms)
    pub updated_at: i64,
}

impl Account {
    /// Create a new account in the pending state
    pub fn new(owner: impl Into<String>, credential: Credential, daily_request_limit: u32) -> Self {
        let owner = owner.into();
        let now = now_ms();
        Self {
            id: generate_id("account", &credential.username),
            owner,
            credential,
            status: AccountStatus::Pending,
            requests_today: 0,
            daily_request_limit,
            consecutive_failures: 0,
            cooldown_until: None,
            blocked_until: None,
            busy: false,
            last_request_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create with a specific ID (for testing or recovery)
    pub fn with_id(id: impl Into<String>, credential: Credential, daily_request_limit: u32) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            owner: String::new(),
            credential,
            status: AccountStatus::Pending,
            requests_today: 0,
            daily_request_limit,
            consecutive_failures: 0,
            cooldown_until: None,
            blocked_until: None,
            busy: false,
            last_request_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply lazy window expiry: cooldown or a timed block that has elapsed
    /// flips the account back to active. Returns true if anything changed.
    ///
    /// Consecutive failures are kept across a cooldown expiry so the next
    /// failure escalates the backoff; only a success or reset clears them.
    pub fn refresh(&mut self, now: i64) -> bool {
        match self.status {
            AccountStatus::Cooldown => {
                if self.cooldown_until.is_none_or(|t| now >= t) {
                    self.status = AccountStatus::Active;
                    self.cooldown_until = None;
                    self.updated_at = now;
                    return true;
                }
                false
            }
            AccountStatus::Blocked => {
                if let Some(t) = self.blocked_until
                    && now >= t
                {
                    self.status = AccountStatus::Active;
                    self.blocked_until = None;
                    self.updated_at = now;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Claim-time eligibility predicate
    pub fn is_eligible(&self, now: i64) -> bool {
        matches!(self.status, AccountStatus::Active | AccountStatus::Pending)
            && !self.busy
            && self.requests_today < self.daily_request_limit
            && self.cooldown_until.is_none_or(|t| now >= t)
            && self.blocked_until.is_none_or(|t| now >= t)
    }

    /// Record a successful execution
    pub fn record_success(&mut self, now: i64) {
        self.consecutive_failures = 0;
        self.requests_today += 1;
        self.last_request_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed execution and evaluate health transitions
    ///
    /// `ban_signal` is true when the collaborator reported an explicit ban,
    /// which escalates straight to blocked instead of counting toward the
    /// cooldown threshold.
    pub fn record_failure(&mut self, ban_signal: bool, now: i64, policy: &HealthPolicy) -> HealthTransition {
        self.consecutive_failures += 1;
        self.last_request_at = Some(now);
        self.updated_at = now;

        if ban_signal || self.consecutive_failures >= policy.hard_failure_threshold {
            self.status = AccountStatus::Blocked;
            self.blocked_until = None;
            self.cooldown_until = None;
            return HealthTransition::Blocked;
        }

        if self.consecutive_failures >= policy.soft_failure_threshold {
            self.status = AccountStatus::Cooldown;
            self.cooldown_until = Some(now + backoff_ms(self.consecutive_failures, policy) as i64);
            return HealthTransition::Cooldown;
        }

        HealthTransition::None
    }

    /// Feed a validation verdict through the state machine
    ///
    /// Only pending accounts are promoted; an invalid verdict blocks the
    /// account regardless of its current state.
    pub fn apply_validation(&mut self, valid: bool, now: i64) {
        if valid {
            if self.status == AccountStatus::Pending {
                self.status = AccountStatus::Active;
                self.updated_at = now;
            }
        } else {
            self.status = AccountStatus::Blocked;
            self.blocked_until = None;
            self.updated_at = now;
        }
    }

    /// Administrative reset: any state back to active, failure history cleared
    pub fn admin_reset(&mut self, now: i64) {
        self.status = AccountStatus::Active;
        self.consecutive_failures = 0;
        self.cooldown_until = None;
        self.blocked_until = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> Account {
        Account::with_id(
            "acct-1",
            Credential {
                username: "user@example.com".to_string(),
                secret: "hunter2".to_string(),
            },
            100,
        )
    }

    #[test]
    fn test_new_account_is_pending() {
        let acct = test_account();
        assert_eq!(acct.status, AccountStatus::Pending);
        assert!(!acct.busy);
        assert!(acct.is_eligible(now_ms()));
    }

    #[test]
    fn test_backoff_curve() {
        let policy = HealthPolicy::default();
        // At the soft threshold: base delay
        assert_eq!(backoff_ms(3, &policy), 60_000);
        assert_eq!(backoff_ms(4, &policy), 120_000);
        assert_eq!(backoff_ms(5, &policy), 240_000);
        // Capped at the maximum
        assert_eq!(backoff_ms(30, &policy), 3_600_000);
    }

    #[test]
    fn test_soft_threshold_enters_cooldown() {
        let policy = HealthPolicy::default();
        let mut acct = test_account();
        let now = 1_000_000;

        assert_eq!(acct.record_failure(false, now, &policy), HealthTransition::None);
        assert_eq!(acct.record_failure(false, now, &policy), HealthTransition::None);
        assert_eq!(acct.record_failure(false, now, &policy), HealthTransition::Cooldown);

        assert_eq!(acct.status, AccountStatus::Cooldown);
        assert_eq!(acct.cooldown_until, Some(now + 60_000));
        assert!(!acct.is_eligible(now));
        // Eligible again once the window elapses (lazy re-evaluation)
        assert!(acct.refresh(now + 60_000));
        assert_eq!(acct.status, AccountStatus::Active);
        assert!(acct.is_eligible(now + 60_000));
    }

    #[test]
    fn test_hard_threshold_blocks() {
        let policy = HealthPolicy {
            soft_failure_threshold: 2,
            hard_failure_threshold: 4,
            ..Default::default()
        };
        let mut acct = test_account();
        let now = 1_000_000;

        acct.record_failure(false, now, &policy);
        acct.record_failure(false, now, &policy);
        acct.record_failure(false, now, &policy);
        assert_eq!(acct.status, AccountStatus::Cooldown);

        assert_eq!(acct.record_failure(false, now, &policy), HealthTransition::Blocked);
        assert_eq!(acct.status, AccountStatus::Blocked);
        assert_eq!(acct.blocked_until, None);
        // Manual-only recovery: no amount of elapsed time clears it
        assert!(!acct.refresh(now + 100_000_000));
        assert!(!acct.is_eligible(now + 100_000_000));
    }

    #[test]
    fn test_ban_signal_escalates_directly() {
        let policy = HealthPolicy::default();
        let mut acct = test_account();

        assert_eq!(acct.record_failure(true, 1_000, &policy), HealthTransition::Blocked);
        assert_eq!(acct.status, AccountStatus::Blocked);
        assert_eq!(acct.consecutive_failures, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let policy = HealthPolicy::default();
        let mut acct = test_account();

        acct.record_failure(false, 1_000, &policy);
        acct.record_failure(false, 1_000, &policy);
        acct.record_success(2_000);

        assert_eq!(acct.consecutive_failures, 0);
        assert_eq!(acct.requests_today, 1);
        assert_eq!(acct.last_request_at, Some(2_000));
    }

    #[test]
    fn test_daily_limit_boundary() {
        let mut acct = test_account();
        acct.status = AccountStatus::Active;
        acct.requests_today = acct.daily_request_limit - 1;
        assert!(acct.is_eligible(1_000));

        acct.record_success(2_000);
        assert_eq!(acct.requests_today, acct.daily_request_limit);
        assert!(!acct.is_eligible(3_000));
    }

    #[test]
    fn test_busy_is_ineligible() {
        let mut acct = test_account();
        acct.busy = true;
        assert!(!acct.is_eligible(1_000));
    }

    #[test]
    fn test_apply_validation() {
        let mut acct = test_account();
        acct.apply_validation(true, 1_000);
        assert_eq!(acct.status, AccountStatus::Active);

        // Valid verdict on a non-pending account is a no-op
        acct.apply_validation(true, 2_000);
        assert_eq!(acct.status, AccountStatus::Active);

        acct.apply_validation(false, 3_000);
        assert_eq!(acct.status, AccountStatus::Blocked);
    }

    #[test]
    fn test_admin_reset() {
        let policy = HealthPolicy::default();
        let mut acct = test_account();
        acct.record_failure(true, 1_000, &policy);
        assert_eq!(acct.status, AccountStatus::Blocked);

        acct.admin_reset(2_000);
        assert_eq!(acct.status, AccountStatus::Active);
        assert_eq!(acct.consecutive_failures, 0);
        assert!(acct.is_eligible(2_000));
    }

    #[test]
    fn test_timed_block_expires() {
        let mut acct = test_account();
        acct.status = AccountStatus::Blocked;
        acct.blocked_until = Some(5_000);

        assert!(!acct.is_eligible(4_999) || acct.status != AccountStatus::Blocked);
        assert!(acct.refresh(5_000));
        assert_eq!(acct.status, AccountStatus::Active);
    }

    #[test]
    fn test_status_serde_round_trip() {
        let acct = test_account();
        let json = serde_json::to_string(&acct).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, acct.status);
        assert_eq!(back.credential, acct.credential);
    }
}
