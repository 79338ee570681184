//! Job domain type
//!
//! A job is a named batch of target URLs. It owns its work units (cascade
//! lifecycle) and carries derived aggregate counters. The counters must
//! always satisfy `processed = successful + failed` and
//! `processed + pending = total_urls`; they are recomputed by the queue on
//! every unit transition, never adjusted ad hoc.

use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::now_ms;
use crate::pool::SelectionStrategy;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate progress counters, derived from unit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub total_urls: u32,
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub pending: u32,
}

impl JobProgress {
    pub fn new(total_urls: u32) -> Self {
        Self {
            total_urls,
            pending: total_urls,
            ..Default::default()
        }
    }

    /// Counter invariants, checked after every transition in debug builds
    pub fn is_consistent(&self) -> bool {
        self.processed == self.successful + self.failed
            && self.processed + self.pending == self.total_urls
    }
}

/// A named batch of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub status: JobStatus,

    /// Account selection strategy for this job's units
    pub strategy: SelectionStrategy,

    /// Retry budget applied to every unit
    pub max_retries: u32,

    pub progress: JobProgress,

    /// Set when units are pending but no eligible account exists
    pub waiting_for_capacity: bool,

    /// Fatal error message, set only on a whole-job abort
    pub error: Option<String>,

    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub paused_at: Option<i64>,
    pub resumed_at: Option<i64>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        total_urls: u32,
        strategy: SelectionStrategy,
        max_retries: u32,
    ) -> Self {
        let name = name.into();
        Self {
            id: generate_id("job", &name),
            name,
            status: JobStatus::Pending,
            strategy,
            max_retries,
            progress: JobProgress::new(total_urls),
            waiting_for_capacity: false,
            error: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            paused_at: None,
            resumed_at: None,
        }
    }
}
