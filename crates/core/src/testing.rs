// crates/core/src/testing.rs
//! In-memory [`ControlPlane`] for tests.
//!
//! Every `watch_*` call subscribes to a broadcast channel, so items pushed
//! after a watch is opened reach every open feed. The fake counts opened and
//! released feeds and delete calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::WatchError;
use crate::plane::{ControlPlane, DeleteOutcome, Feed, ResourceChange};
use crate::types::{DiagnosticEvent, JobIdentity, JobPhase, JobRecord};

#[derive(Debug, Clone)]
enum Scripted<T> {
    Item(T),
    Fail(String),
    End,
}

/// Increments a counter when the owning feed is dropped.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeControlPlane {
    jobs: broadcast::Sender<Scripted<ResourceChange>>,
    events: broadcast::Sender<Scripted<DiagnosticEvent>>,
    fail_job_setup: AtomicBool,
    fail_event_setup: AtomicBool,
    fail_delete: AtomicBool,
    present: AtomicBool,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    deletes: Mutex<Vec<JobIdentity>>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: broadcast::channel(1024).0,
            events: broadcast::channel(1024).0,
            fail_job_setup: AtomicBool::new(false),
            fail_event_setup: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            present: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            deletes: Mutex::new(Vec::new()),
        })
    }

    // -- Scripting ------------------------------------------------------------

    pub fn push_change(&self, change: ResourceChange) {
        let _ = self.jobs.send(Scripted::Item(change));
    }

    pub fn push_record(&self, record: JobRecord) {
        self.push_change(ResourceChange::Modified(record));
    }

    pub fn push_phase(&self, job: &JobIdentity, phase: JobPhase) {
        self.push_record(JobRecord::new(job.clone(), phase));
    }

    pub fn push_event(&self, event: DiagnosticEvent) {
        let _ = self.events.send(Scripted::Item(event));
    }

    pub fn fail_job_feed(&self, message: &str) {
        let _ = self.jobs.send(Scripted::Fail(message.to_string()));
    }

    pub fn fail_event_feed(&self, message: &str) {
        let _ = self.events.send(Scripted::Fail(message.to_string()));
    }

    pub fn end_job_feed(&self) {
        let _ = self.jobs.send(Scripted::End);
    }

    pub fn end_event_feed(&self) {
        let _ = self.events.send(Scripted::End);
    }

    pub fn fail_job_watch_setup(&self, fail: bool) {
        self.fail_job_setup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_event_watch_setup(&self, fail: bool) {
        self.fail_event_setup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    // -- Observations ---------------------------------------------------------

    pub fn opened_subscriptions(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_subscriptions(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> Vec<JobIdentity> {
        self.deletes.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn feed<T: Clone + Send + 'static>(&self, rx: broadcast::Receiver<Scripted<T>>) -> Feed<T> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = ReleaseGuard(self.released.clone());
        async_stream::stream! {
            let _guard = guard;
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(Scripted::Item(item)) => yield Ok(item),
                    Ok(Scripted::Fail(message)) => yield Err(WatchError::feed(message)),
                    Ok(Scripted::End) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn watch_job(&self, job: &JobIdentity) -> Result<Feed<ResourceChange>, WatchError> {
        if self.fail_job_setup.load(Ordering::SeqCst) {
            return Err(WatchError::setup("job", job, "connection refused"));
        }
        Ok(self.feed(self.jobs.subscribe()))
    }

    async fn watch_events(&self, job: &JobIdentity) -> Result<Feed<DiagnosticEvent>, WatchError> {
        if self.fail_event_setup.load(Ordering::SeqCst) {
            return Err(WatchError::setup("event", job, "events API unavailable"));
        }
        Ok(self.feed(self.events.subscribe()))
    }

    async fn delete_job(&self, job: &JobIdentity) -> Result<DeleteOutcome, WatchError> {
        if let Ok(mut deletes) = self.deletes.lock() {
            deletes.push(job.clone());
        }
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(WatchError::Delete {
                job: job.clone(),
                message: "HTTP 500 Internal Server Error".to_string(),
            });
        }
        if self.present.swap(false, Ordering::SeqCst) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyGone)
        }
    }
}
