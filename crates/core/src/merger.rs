// crates/core/src/merger.rs
//! Fan-in of the job-record feed and the diagnostic-event feed.
//!
//! ## Grace period
//!
//! The control plane gives no ordering guarantee between the two feeds: the
//! event that explains a failure can arrive after the terminal job update.
//! The merger therefore does not close on the first terminal phase. It arms a
//! deadline (`grace_period` after the first terminal update) and keeps
//! forwarding diagnostics until that deadline fires:
//!
//! ```text
//! NotTerminal ──terminal update──▶ TerminalPending{deadline} ──deadline──▶ Closed
//! ```
//!
//! ## Backpressure
//!
//! The output channel is bounded (`buffer_depth`). When it is full, the new
//! signal is dropped and a warning is logged; the merge loop never waits on a
//! slow consumer. Consumers must tolerate gaps. [`MergedStream::dropped`]
//! reports how many signals were lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::plane::{ControlPlane, ResourceChange};
use crate::types::{
    CloseReason, ControlCommand, DiagnosticEvent, JobIdentity, JobPhase, JobRecord, MergedSignal,
};
use crate::watch::{EventChangeWatcher, ResourceChangeWatcher, Subscription};

/// Where the monitor is relative to the job's terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraceState {
    NotTerminal,
    TerminalPending { deadline: Instant },
    Closed,
}

impl GraceState {
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::TerminalPending { deadline } => Some(deadline),
            _ => None,
        }
    }

    fn terminal_seen(self) -> bool {
        !matches!(self, Self::NotTerminal)
    }
}

/// Read side of one monitor. The stream ends when the monitor exits.
pub struct MergedStream {
    job: JobIdentity,
    rx: mpsc::Receiver<MergedSignal>,
    dropped: Arc<AtomicU64>,
}

impl MergedStream {
    pub fn job(&self) -> &JobIdentity {
        &self.job
    }

    pub async fn recv(&mut self) -> Option<MergedSignal> {
        self.rx.recv().await
    }

    /// Signals discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Starts merge loops for individual jobs.
#[derive(Clone)]
pub struct StreamMerger {
    plane: Arc<dyn ControlPlane>,
    config: MonitorConfig,
}

impl StreamMerger {
    pub fn new(plane: Arc<dyn ControlPlane>, config: MonitorConfig) -> Self {
        Self { plane, config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Open both subscriptions for `job` and spawn the merge loop.
    ///
    /// Failure to open the job feed is returned here. Failure to open the
    /// event feed only degrades the monitor to job updates.
    pub async fn start(
        &self,
        job: JobIdentity,
        cancel: CancellationToken,
    ) -> Result<MergedStream, MonitorError> {
        let jobs = ResourceChangeWatcher::new(self.plane.clone(), self.config.feed_depth);
        let jobs = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            opened = jobs.open(&job) => opened.map_err(MonitorError::SubscriptionSetup)?,
        };

        let events = EventChangeWatcher::new(self.plane.clone(), self.config.feed_depth);
        let events = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                jobs.close().await;
                return Err(MonitorError::Cancelled);
            }
            opened = events.open(&job) => match opened {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!(job = %job, error = %e, "event watch unavailable, continuing with job updates only");
                    None
                }
            },
        };

        let (tx, rx) = mpsc::channel(self.config.buffer_depth.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let merge = MergeLoop {
            job: job.clone(),
            tx,
            dropped: dropped.clone(),
            grace_period: self.config.grace_period,
            grace: GraceState::NotTerminal,
            started: false,
        };
        tokio::spawn(merge.run(jobs, events, cancel));

        info!(job = %job, "monitor started");
        Ok(MergedStream { job, rx, dropped })
    }
}

struct MergeLoop {
    job: JobIdentity,
    tx: mpsc::Sender<MergedSignal>,
    dropped: Arc<AtomicU64>,
    grace_period: std::time::Duration,
    grace: GraceState,
    started: bool,
}

/// Resolves at `deadline`, or never when there is none.
async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_event(
    events: &mut Option<Subscription<DiagnosticEvent>>,
) -> Option<Result<DiagnosticEvent, crate::error::WatchError>> {
    match events {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

impl MergeLoop {
    async fn run(
        mut self,
        mut jobs: Subscription<ResourceChange>,
        mut events: Option<Subscription<DiagnosticEvent>>,
        cancel: CancellationToken,
    ) {
        let mut jobs_open = true;

        // `None` is a clean exit: grace elapsed or the consumer went away.
        let close: Option<CloseReason> = loop {
            let deadline = self.grace.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(CloseReason::Cancelled),
                _ = self.tx.closed() => {
                    debug!(job = %self.job, "consumer dropped the stream");
                    break None;
                }
                change = jobs.recv(), if jobs_open => match change {
                    Some(Ok(ResourceChange::Deleted(_))) => {
                        jobs_open = false;
                        if !self.grace.terminal_seen() {
                            warn!(job = %self.job, "job deleted before reaching a terminal phase");
                            break Some(CloseReason::Unexpected);
                        }
                    }
                    Some(Ok(change)) => self.on_record(change.into_record()),
                    Some(Err(e)) if self.grace.terminal_seen() => {
                        warn!(job = %self.job, error = %e, "job feed failed during grace period");
                        jobs_open = false;
                    }
                    Some(Err(e)) => {
                        warn!(job = %self.job, error = %e, "job feed failed");
                        break Some(CloseReason::Error(e.to_string()));
                    }
                    None => {
                        jobs_open = false;
                        if !self.grace.terminal_seen() {
                            warn!(job = %self.job, "job feed closed before a terminal phase");
                            break Some(CloseReason::Unexpected);
                        }
                    }
                },
                event = next_event(&mut events) => match event {
                    Some(Ok(event)) => self.emit(MergedSignal::Diagnostic(event)),
                    Some(Err(e)) => {
                        warn!(job = %self.job, error = %e, "event feed failed, continuing with job updates only");
                        if let Some(sub) = events.take() {
                            sub.close().await;
                        }
                    }
                    None => {
                        debug!(job = %self.job, "event feed ended");
                        if let Some(sub) = events.take() {
                            sub.close().await;
                        }
                    }
                },
                _ = grace_elapsed(deadline) => {
                    self.grace = GraceState::Closed;
                    break None;
                }
            }
        };

        // Release both subscriptions before the stream can be observed as closed.
        jobs.close().await;
        if let Some(sub) = events.take() {
            sub.close().await;
        }

        match close {
            Some(reason) => {
                info!(job = %self.job, reason = %reason, "monitor closed");
                self.deliver_closed(reason).await;
            }
            None => info!(job = %self.job, dropped_total = self.dropped.load(Ordering::Relaxed), "monitor finished"),
        }
    }

    fn on_record(&mut self, record: JobRecord) {
        let phase = record.phase;
        self.emit(MergedSignal::JobUpdate(record));

        if phase == JobPhase::Running && !self.started {
            self.started = true;
            self.emit(MergedSignal::ControlCommand(ControlCommand::Start));
        }

        if phase.is_terminal() && !self.grace.terminal_seen() {
            self.emit(MergedSignal::ControlCommand(ControlCommand::Stop));
            let deadline = Instant::now() + self.grace_period;
            self.grace = GraceState::TerminalPending { deadline };
            debug!(
                job = %self.job,
                phase = phase.as_str(),
                grace_ms = self.grace_period.as_millis() as u64,
                "terminal phase observed, draining diagnostics"
            );
        } else if phase.is_terminal() {
            debug!(job = %self.job, phase = phase.as_str(), "repeated terminal update");
        }
    }

    /// The terminal signal waits for buffer room, bounded by the grace period.
    async fn deliver_closed(&self, reason: CloseReason) {
        match tokio::time::timeout(self.grace_period, self.tx.send(MergedSignal::Closed(reason))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!(job = %self.job, "merged stream receiver gone"),
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    job = %self.job,
                    dropped_total = total,
                    "consumer stalled, terminal signal not delivered"
                );
            }
        }
    }

    fn emit(&self, signal: MergedSignal) {
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 || total % 100 == 0 {
                    warn!(
                        job = %self.job,
                        signal = signal.kind(),
                        dropped_total = total,
                        "merged stream full, signal dropped (consumer is behind)"
                    );
                } else {
                    debug!(job = %self.job, signal = signal.kind(), dropped_total = total, "signal dropped");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(job = %self.job, "merged stream receiver gone");
            }
        }
    }
}
