//! Terminal rendering for the interactive `watch` session.

use std::io::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use jobwatch_core::{
    DiagnosticEvent, EventType, JobIdentity, JobOutcome, JobPhase, Presenter, RelaySummary, SpinnerState,
};
use serde_json::{json, Value};

use crate::args::{OutputFormat, Verbosity};

/// Whether a diagnostic of `event_type` is printed at `verbosity`.
pub fn diagnostic_visible(verbosity: Verbosity, event_type: EventType) -> bool {
    match verbosity {
        Verbosity::Quiet => false,
        Verbosity::Normal => event_type != EventType::Normal,
        Verbosity::Verbose => true,
    }
}

pub fn format_diagnostic(event: &DiagnosticEvent) -> String {
    let marker = match event.event_type {
        EventType::Normal => "\u{00b7}",
        EventType::Warning => "!",
        EventType::Error => "\u{2717}",
    };
    let mut line = format!("  {marker} {}: {}", event.reason, event.message);
    if !event.source.is_empty() {
        line.push_str(&format!(" ({})", event.source));
    }
    line
}

/// Spinner plus diagnostics on stderr.
pub struct TerminalPresenter {
    job: JobIdentity,
    bar: ProgressBar,
    verbosity: Verbosity,
    format: OutputFormat,
}

impl TerminalPresenter {
    pub fn new(job: JobIdentity, verbosity: Verbosity, format: OutputFormat) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner} {prefix} {msg}") {
            bar.set_style(style);
        }
        bar.set_prefix(job.to_string());
        bar.set_message(SpinnerState::Idle.label());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            job,
            bar,
            verbosity,
            format,
        }
    }

    /// Clear the spinner if the stream ended without a final state.
    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl Presenter for TerminalPresenter {
    fn spinner(&mut self, state: SpinnerState) {
        match state {
            SpinnerState::Idle | SpinnerState::Loading => self.bar.set_message(state.label()),
            SpinnerState::Success => {
                self.bar.finish_and_clear();
                eprintln!("  \u{2713} {} {}", self.job, state.label().to_lowercase());
            }
            SpinnerState::Error => {
                self.bar.finish_and_clear();
                eprintln!("  \u{2717} {} {}", self.job, state.label().to_lowercase());
            }
        }
    }

    fn diagnostic(&mut self, event: &DiagnosticEvent) {
        if diagnostic_visible(self.verbosity, event.event_type) {
            let line = format_diagnostic(event);
            self.bar.suspend(|| eprintln!("{line}"));
        }
    }

    fn phase(&mut self, phase: JobPhase) {
        if phase == JobPhase::Pending {
            self.bar.set_message("Pending");
        }
    }

    fn responses(&mut self, responses: &[Value]) {
        // JSON output prints responses as part of the final result.
        if self.format == OutputFormat::Text {
            let mut stdout = std::io::stdout().lock();
            for response in responses {
                let _ = writeln!(stdout, "{response}");
            }
        }
    }
}

pub fn outcome_json(job: &JobIdentity, outcome: &JobOutcome) -> Value {
    match outcome {
        JobOutcome::Done { responses } => json!({
            "job": job.to_string(),
            "status": "done",
            "responses": responses,
        }),
        JobOutcome::Error { message } => json!({
            "job": job.to_string(),
            "status": "error",
            "message": message,
        }),
        JobOutcome::Cancelled { cause } => json!({
            "job": job.to_string(),
            "status": "cancelled",
            "message": cause.to_string(),
        }),
    }
}

/// Print the final result: a summary line on stderr for text, one JSON
/// object on stdout for json.
pub fn render_outcome(job: &JobIdentity, outcome: &JobOutcome, format: OutputFormat) -> std::io::Result<()> {
    match format {
        OutputFormat::Json => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", outcome_json(job, outcome))?;
            stdout.flush()
        }
        OutputFormat::Text => {
            match outcome {
                JobOutcome::Done { responses } => eprintln!("  {} response(s)", responses.len()),
                JobOutcome::Error { message } => eprintln!("  Error: {message}"),
                JobOutcome::Cancelled { cause } => eprintln!("  Cancelled: {cause}"),
            }
            Ok(())
        }
    }
}

/// `stream` succeeds only when the monitor closed normally and nothing cancelled it.
pub fn stream_exit_code(summary: &RelaySummary, cancelled: bool) -> i32 {
    if summary.is_clean() && !cancelled {
        0
    } else {
        1
    }
}
