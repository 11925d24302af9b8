// crates/core/src/completion.rs
//! Blocking consumer: drives one job to a final outcome and deletes it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cancel::{CancelSource, CancellationController};
use crate::error::MonitorError;
use crate::merger::{MergedStream, StreamMerger};
use crate::plane::ControlPlane;
use crate::progress::{self, SpinnerState};
use crate::types::{ClientJobState, CloseReason, DiagnosticEvent, JobIdentity, JobPhase, JobRecord, MergedSignal};

/// Upper bound on the cleanup delete call.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Rendering seam for the interactive consumer.
pub trait Presenter: Send {
    fn spinner(&mut self, state: SpinnerState);
    fn diagnostic(&mut self, event: &DiagnosticEvent);
    fn phase(&mut self, _phase: JobPhase) {}
    fn responses(&mut self, responses: &[Value]);
}

/// Why a job ended without a terminal phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    Cancel(CancelSource),
    Closed(CloseReason),
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel(source) => source.fmt(f),
            Self::Closed(reason) => reason.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done { responses: Vec<Value> },
    Error { message: String },
    Cancelled { cause: StopCause },
}

impl JobOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done { .. } => 0,
            Self::Error { .. } | Self::Cancelled { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Error message for a job that ended in the error phase.
///
/// Uses the most recent diagnostic whose reason names an error, then the
/// record's own diagnostics, then a generic message.
pub fn derive_error_message(diagnostics: &[DiagnosticEvent], record: &JobRecord) -> String {
    if let Some(event) = diagnostics.iter().rev().find(|e| e.reason_indicates_error()) {
        if event.message.trim().is_empty() {
            return event.reason.clone();
        }
        return event.message.clone();
    }
    match record.diagnostics.as_deref().map(str::trim) {
        Some(detail) if !detail.is_empty() => detail.to_string(),
        _ => format!("job {} failed without diagnostics", record.identity),
    }
}

pub struct CompletionController<P> {
    plane: Arc<dyn ControlPlane>,
    presenter: P,
    cancel: CancellationController,
    state: ClientJobState,
    spinner: SpinnerState,
    cleanup_attempted: bool,
}

impl<P: Presenter> CompletionController<P> {
    pub fn new(plane: Arc<dyn ControlPlane>, presenter: P, cancel: CancellationController) -> Self {
        Self {
            plane,
            presenter,
            cancel,
            state: ClientJobState::Submitted,
            spinner: SpinnerState::Idle,
            cleanup_attempted: false,
        }
    }

    /// Handle for the UI-level interrupt (e.g. a keypress).
    pub fn interrupter(&self) -> CancellationController {
        self.cancel.clone()
    }

    pub fn state(&self) -> ClientJobState {
        self.state
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn into_presenter(self) -> P {
        self.presenter
    }

    /// Start a monitor for `job` and drive it to completion.
    ///
    /// Setup failures are returned after the cleanup attempt.
    pub async fn watch(&mut self, merger: &StreamMerger, job: &JobIdentity) -> Result<JobOutcome, MonitorError> {
        match merger.start(job.clone(), self.cancel.token()).await {
            Ok(stream) => Ok(self.run(job, stream).await),
            Err(MonitorError::Cancelled) => {
                self.cleanup(job).await;
                Ok(JobOutcome::Cancelled {
                    cause: self.stop_cause(CloseReason::Cancelled),
                })
            }
            Err(e) => {
                warn!(job = %job, error = %e, "monitor setup failed");
                self.cleanup(job).await;
                Err(e)
            }
        }
    }

    /// Drain `stream` until it closes, then clean up and conclude.
    pub async fn run(&mut self, job: &JobIdentity, mut stream: MergedStream) -> JobOutcome {
        let mut terminal: Option<JobRecord> = None;
        let mut diagnostics = Vec::new();
        let mut closed = None;

        while let Some(signal) = stream.recv().await {
            let next = progress::transition(self.spinner, &signal);
            if next != self.spinner {
                self.spinner = next;
                self.presenter.spinner(next);
            }

            match signal {
                MergedSignal::JobUpdate(record) => {
                    self.state = self.state.observe(record.phase);
                    self.presenter.phase(record.phase);
                    // Terminal phases never change; keep the first one and
                    // keep draining for trailing diagnostics.
                    if record.phase.is_terminal() && terminal.is_none() {
                        terminal = Some(record);
                    }
                }
                MergedSignal::Diagnostic(event) => {
                    self.presenter.diagnostic(&event);
                    diagnostics.push(event);
                }
                MergedSignal::ControlCommand(cmd) => debug!(job = %job, command = ?cmd, "control command"),
                MergedSignal::Closed(reason) => closed = Some(reason),
            }
        }

        if stream.dropped() > 0 {
            warn!(job = %job, dropped_total = stream.dropped(), "some signals were dropped under backpressure");
        }

        let outcome = match terminal {
            Some(record) if record.phase == JobPhase::Done => {
                self.presenter.responses(&record.responses);
                JobOutcome::Done {
                    responses: record.responses,
                }
            }
            Some(record) => JobOutcome::Error {
                message: derive_error_message(&diagnostics, &record),
            },
            None => JobOutcome::Cancelled {
                cause: self.stop_cause(closed.unwrap_or(CloseReason::Unexpected)),
            },
        };

        self.cleanup(job).await;
        info!(job = %job, exit_code = outcome.exit_code(), "job finished");
        outcome
    }

    /// Delete the job once. Later calls are no-ops.
    ///
    /// Returns whether this call reached [`ClientJobState::Cleaned`].
    pub async fn cleanup(&mut self, job: &JobIdentity) -> bool {
        if self.cleanup_attempted {
            debug!(job = %job, "cleanup already attempted");
            return false;
        }
        self.cleanup_attempted = true;

        match tokio::time::timeout(CLEANUP_TIMEOUT, self.plane.delete_job(job)).await {
            Ok(Ok(outcome)) => {
                debug!(job = %job, outcome = ?outcome, "job cleaned up");
                self.state = self.state.cleaned();
                true
            }
            Ok(Err(e)) => {
                warn!(job = %job, error = %e, "cleanup failed");
                false
            }
            Err(_) => {
                warn!(job = %job, timeout_secs = CLEANUP_TIMEOUT.as_secs(), "cleanup timed out");
                false
            }
        }
    }

    fn stop_cause(&self, reason: CloseReason) -> StopCause {
        match self.cancel.source() {
            Some(source) => StopCause::Cancel(source),
            None => StopCause::Closed(reason),
        }
    }
}
