// crates/core/src/error.rs
use thiserror::Error;

use crate::types::JobIdentity;

/// Errors raised by a control-plane collaborator (watch or delete).
#[derive(Debug, Error)]
pub enum WatchError {
    /// Opening a subscription failed. Fatal for the monitor, never retried here.
    #[error("Failed to open {feed} watch for {job}: {message}")]
    Setup {
        feed: &'static str,
        job: JobIdentity,
        message: String,
    },

    /// A live feed reported an error after it was opened.
    #[error("Watch feed error: {message}")]
    Feed { message: String },

    /// A notification could not be decoded.
    #[error("Malformed watch notification: {message}")]
    Decode { message: String },

    /// The delete call failed for a reason other than absence.
    #[error("Failed to delete {job}: {message}")]
    Delete { job: JobIdentity, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WatchError {
    pub fn setup(feed: &'static str, job: &JobIdentity, message: impl Into<String>) -> Self {
        Self::Setup {
            feed,
            job: job.clone(),
            message: message.into(),
        }
    }

    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed {
            message: message.into(),
        }
    }
}

/// Errors returned synchronously when starting a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Subscription setup failed: {0}")]
    SubscriptionSetup(#[source] WatchError),

    /// Cancellation fired while the subscriptions were still being opened.
    #[error("Cancelled before the job watch was established")]
    Cancelled,
}

/// Connection-scoped failures of a stream relay.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer disconnected: {0}")]
    Disconnected(#[from] std::io::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invalid configuration values (environment or flags).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
