//! Error types
//!
//! Library errors are concrete `thiserror` enums; the binary layer wraps
//! them in `eyre` reports. Transient conditions (no eligible account) are
//! modeled as values on the acquire path, not as errors — only genuine
//! faults land here.

use thiserror::Error;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

/// Dispatch and queue errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Whole-job abort: configuration invalid or zero accounts configured
    #[error("Fatal job error: {0}")]
    JobFatal(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {id} is {status} and cannot be {action}")]
    InvalidJobState {
        id: String,
        status: crate::domain::JobStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
