// crates/core/src/plane.rs
//! The control-plane seam: live feeds of job records and diagnostic events,
//! plus an idempotent delete.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::WatchError;
use crate::types::{DiagnosticEvent, JobIdentity, JobRecord};

/// A live feed opened against the control plane. Ends when the remote side
/// closes the watch.
pub type Feed<T> = BoxStream<'static, Result<T, WatchError>>;

/// One notification from the job-record watch.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceChange {
    Added(JobRecord),
    Modified(JobRecord),
    Deleted(JobRecord),
}

impl ResourceChange {
    pub fn record(&self) -> &JobRecord {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r,
        }
    }
}

/// Result of a delete call. Both variants count as successful cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// Remote API consumed by the monitor.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Open a feed of add/modify/delete notifications for one job.
    async fn watch_job(&self, job: &JobIdentity) -> Result<Feed<ResourceChange>, WatchError>;

    /// Open a feed of events whose involved object is `job.name`.
    async fn watch_events(&self, job: &JobIdentity) -> Result<Feed<DiagnosticEvent>, WatchError>;

    /// Remove the job record. Must succeed with `AlreadyGone` when absent.
    async fn delete_job(&self, job: &JobIdentity) -> Result<DeleteOutcome, WatchError>;
}
