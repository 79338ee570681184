//! Work unit domain type
//!
//! One target URL inside a job, the unit of retry and status tracking.
//! Units reference the account and proxy of their last attempt for
//! diagnostics only; they never own those resources.

use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Work unit lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One target URL inside a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique identifier
    pub id: String,

    /// Owning job
    pub job_id: String,

    /// Target URL
    pub url: String,

    pub status: UnitStatus,

    /// Attempts consumed beyond the first
    pub retries: u32,

    /// Retry budget, copied from the job at submission
    pub max_retries: u32,

    /// Last error message, for operator diagnostics
    pub last_error: Option<String>,

    /// Account used in the most recent attempt
    pub last_account_id: Option<String>,

    /// Proxy used in the most recent attempt
    pub last_proxy_id: Option<String>,

    /// Wall-clock duration of the most recent attempt
    pub processing_time_ms: Option<u64>,
}

impl WorkUnit {
    pub fn new(job_id: impl Into<String>, url: impl Into<String>, max_retries: u32) -> Self {
        let url = url.into();
        Self {
            id: generate_id("unit", &url),
            job_id: job_id.into(),
            url,
            status: UnitStatus::Pending,
            retries: 0,
            max_retries,
            last_error: None,
            last_account_id: None,
            last_proxy_id: None,
            processing_time_ms: None,
        }
    }

    /// Whether a failed attempt leaves budget for another try
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}
