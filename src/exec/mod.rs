//! Execution and validation collaborators
//!
//! The scheduler never scrapes anything itself. It hands (url, credential,
//! proxy) to an [`Executor`] and interprets only the success flag and error
//! kind of the report. The default [`CommandExecutor`] shells out to an
//! external program, which keeps browser automation out of this process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Credential, Proxy};

/// Classified execution failure, drives account health transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Session or token no longer valid
    AuthExpired,
    /// Upstream throttled the request
    RateLimited,
    /// Explicit ban signal; escalates the account straight to blocked
    Blocked,
    /// Transport-level failure, likely the proxy's fault
    Network,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "auth_expired"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Blocked => write!(f, "blocked"),
            Self::Network => write!(f, "network"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of one execution attempt
///
/// Wire shape is `{"success": true, "data": ...}` or
/// `{"success": false, "error_kind": "...", "message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WireReport", into = "WireReport")]
pub enum ExecReport {
    Success {
        /// Scraped payload, opaque to the scheduler
        data: serde_json::Value,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Serialize, Deserialize)]
struct WireReport {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<WireReport> for ExecReport {
    fn from(wire: WireReport) -> Self {
        if wire.success {
            Self::Success {
                data: wire.data.unwrap_or(serde_json::Value::Null),
            }
        } else {
            Self::Failure {
                kind: wire.error_kind.unwrap_or(ErrorKind::Unknown),
                message: wire.message.unwrap_or_default(),
            }
        }
    }
}

impl From<ExecReport> for WireReport {
    fn from(report: ExecReport) -> Self {
        match report {
            ExecReport::Success { data } => Self {
                success: true,
                data: Some(data),
                error_kind: None,
                message: None,
            },
            ExecReport::Failure { kind, message } => Self {
                success: false,
                data: None,
                error_kind: Some(kind),
                message: Some(message),
            },
        }
    }
}

impl ExecReport {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure { kind, message: message.into() }
    }
}

/// External scraping collaborator
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, url: &str, credential: &Credential, proxy: Option<&Proxy>) -> ExecReport;
}

/// Credential validation verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub status: String,
}

/// External credential-check collaborator, used only for the
/// pending-to-active promotion by a scheduled task
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, credential: &Credential) -> Validation;
}

/// Executor that shells out to an external command
///
/// The command receives the target URL as its single argument and the
/// credential/proxy via environment variables, and prints an [`ExecReport`]
/// as JSON on stdout. A non-zero exit with unparseable output is treated as
/// an unknown failure.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, url: &str, credential: &Credential, proxy: Option<&Proxy>) -> ExecReport {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg(url)
            .env("SCRAPE_USERNAME", &credential.username)
            .env("SCRAPE_SECRET", &credential.secret)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(proxy) = proxy {
            cmd.env("SCRAPE_PROXY", proxy.url());
        }

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to spawn executor command");
                return ExecReport::failure(ErrorKind::Unknown, format!("spawn failed: {}", e));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<ExecReport>(stdout.trim()) {
            Ok(report) => report,
            Err(e) => {
                debug!(error = %e, "Executor output was not a valid report");
                let stderr = String::from_utf8_lossy(&output.stderr);
                let kind = if output.status.success() {
                    ErrorKind::Unknown
                } else {
                    ErrorKind::Network
                };
                ExecReport::failure(kind, stderr.trim().to_string())
            }
        }
    }
}
