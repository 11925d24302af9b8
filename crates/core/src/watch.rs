// crates/core/src/watch.rs
//! Job-record and diagnostic-event watchers.
//!
//! Each open subscription runs one producer task that pulls from the remote
//! feed into a bounded queue. The [`Subscription`] handle owns that task:
//! [`Subscription::close`] stops it and waits until the remote feed has been
//! dropped, so teardown is complete when `close` returns.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WatchError;
use crate::plane::{ControlPlane, Feed, ResourceChange};
use crate::types::{DiagnosticEvent, JobIdentity};

/// Handle to one live feed.
pub struct Subscription<T> {
    feed: &'static str,
    rx: mpsc::Receiver<Result<T, WatchError>>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    fn spawn(feed: &'static str, job: &JobIdentity, source: Feed<T>, depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        let job = job.clone();

        let task = tokio::spawn(async move {
            let mut source = source;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = task_stop.cancelled() => break,
                    item = source.next() => item,
                };
                let Some(item) = item else {
                    debug!(feed, job = %job, "remote feed ended");
                    break;
                };
                let failed = item.is_err();
                tokio::select! {
                    biased;
                    _ = task_stop.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                // A feed error is the last item the feed delivers.
                if failed {
                    break;
                }
            }
            drop(source);
            debug!(feed, job = %job, "subscription closed");
        });

        Self {
            feed,
            rx,
            stop,
            task: Some(task),
        }
    }
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the remote feed has ended.
    pub async fn recv(&mut self) -> Option<Result<T, WatchError>> {
        self.rx.recv().await
    }

    /// Stop the producer and wait for the remote feed to be released.
    pub async fn close(mut self) {
        self.stop.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(feed = self.feed, "subscription task ended abnormally: {e}");
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Opens job-record feeds filtered to one identity.
#[derive(Clone)]
pub struct ResourceChangeWatcher {
    plane: Arc<dyn ControlPlane>,
    depth: usize,
}

impl ResourceChangeWatcher {
    pub fn new(plane: Arc<dyn ControlPlane>, depth: usize) -> Self {
        Self { plane, depth }
    }

    pub async fn open(&self, job: &JobIdentity) -> Result<Subscription<ResourceChange>, WatchError> {
        let source = self.plane.watch_job(job).await?;
        Ok(Subscription::spawn("job", job, source, self.depth))
    }
}

/// Opens diagnostic-event feeds for events that reference one identity.
#[derive(Clone)]
pub struct EventChangeWatcher {
    plane: Arc<dyn ControlPlane>,
    depth: usize,
}

impl EventChangeWatcher {
    pub fn new(plane: Arc<dyn ControlPlane>, depth: usize) -> Self {
        Self { plane, depth }
    }

    pub async fn open(&self, job: &JobIdentity) -> Result<Subscription<DiagnosticEvent>, WatchError> {
        let source = self.plane.watch_events(job).await?;
        Ok(Subscription::spawn("event", job, source, self.depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeControlPlane;
    use crate::types::{EventType, JobPhase, JobRecord};
    use pretty_assertions::assert_eq;

    fn job() -> JobIdentity {
        JobIdentity::new("q-1", "default")
    }

    #[tokio::test]
    async fn test_resource_watcher_forwards_changes() {
        let plane = FakeControlPlane::new();
        let watcher = ResourceChangeWatcher::new(plane.clone(), 8);
        let mut sub = watcher.open(&job()).await.unwrap();

        plane.push_phase(&job(), JobPhase::Running);
        plane.end_job_feed();

        let first = sub.recv().await.unwrap().unwrap();
        assert_eq!(
            first,
            ResourceChange::Modified(JobRecord::new(job(), JobPhase::Running))
        );
        assert!(sub.recv().await.is_none());
        sub.close().await;
        assert_eq!(plane.closed_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_feed_error_is_last_item() {
        let plane = FakeControlPlane::new();
        let watcher = EventChangeWatcher::new(plane.clone(), 8);
        let mut sub = watcher.open(&job()).await.unwrap();

        plane.fail_event_feed("connection reset");
        plane.push_event(DiagnosticEvent::new(EventType::Normal, "Late", "never seen"));

        let err = sub.recv().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_releases_remote_feed() {
        let plane = FakeControlPlane::new();
        let sub = ResourceChangeWatcher::new(plane.clone(), 8)
            .open(&job())
            .await
            .unwrap();
        assert_eq!(plane.opened_subscriptions(), 1);
        assert_eq!(plane.closed_subscriptions(), 0);

        sub.close().await;
        assert_eq!(plane.closed_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_propagates() {
        let plane = FakeControlPlane::new();
        plane.fail_job_watch_setup(true);
        let result = ResourceChangeWatcher::new(plane.clone(), 8).open(&job()).await;
        assert!(matches!(result, Err(WatchError::Setup { feed: "job", .. })));
        assert_eq!(plane.opened_subscriptions(), 0);
    }
}
