//! Error types for the smoke test core
//!
//! Step failures, readiness-wait terminal failures and dashboard publish
//! failures each get their own type so callers can decide what is fatal.

use std::time::Duration;
use thiserror::Error;

use crate::wait::ResourceKind;

/// A step failure carrying the extra fields the result tree can expose.
///
/// Step bodies return `anyhow::Result`; when the error chain contains a
/// `StepFailure`, its detail and status code end up in the failed leaf.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StepFailure {
    /// Short machine-ish error, e.g. an OAuth error code
    pub message: String,

    /// Longer human readable description
    pub detail: Option<String>,

    /// HTTP status code of the failed exchange, if any
    pub status_code: Option<u16>,
}

impl StepFailure {
    /// Create a failure with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            status_code: None,
        }
    }

    /// Attach a description
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the HTTP status code
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// Terminal failures of a readiness wait
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    /// The deadline elapsed before the target condition held
    #[error("deadline of {deadline:?} exceeded after {polls} polls{}", last_error_suffix(.last_error))]
    DeadlineExceeded {
        deadline: Duration,
        polls: u32,
        /// Last transient fetch error, kept for diagnostics only
        last_error: Option<String>,
    },

    /// The caller cancelled the wait
    #[error("wait cancelled after {polls} polls")]
    Cancelled { polls: u32 },

    /// The resource kind has no readiness predicate
    #[error("waiting for {0} is not supported")]
    Unsupported(ResourceKind),

    /// The wait options do not fit the resource kind
    #[error("invalid wait option: {0}")]
    InvalidOption(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last fetch error: {})", e),
        None => String::new(),
    }
}

impl WaitError {
    /// Create an invalid option error
    pub fn invalid_option(msg: impl Into<String>) -> Self {
        WaitError::InvalidOption(msg.into())
    }
}

/// Dashboard publish errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// Publishing is not configured
    #[error("Publish endpoint not configured: {0}")]
    NotConfigured(String),

    /// Network or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Endpoint answered with something other than 204
    #[error("Received unexpected status code {0} from dashboard")]
    UnexpectedStatus(u16),

    /// Result tree could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err.to_string())
    }
}
