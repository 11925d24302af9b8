// crates/core/src/types.rs
//! Data model shared by the watchers, the merger and both consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key for a job instance on the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub name: String,
    pub namespace: String,
}

impl JobIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase reported by the control plane.
///
/// `Done` and `Error` are terminal: once reported, the phase never changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Done,
    Error,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Lenient parse of a wire phase. Missing or unknown phases are `Pending`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("running") => Self::Running,
            Some("done") => Self::Done,
            Some("error") => Self::Error,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Current state of a job as carried by one resource-feed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub identity: JobIdentity,
    pub phase: JobPhase,
    #[serde(default)]
    pub responses: Vec<serde_json::Value>,
    /// Free-form detail the control plane attaches to the record, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl JobRecord {
    pub fn new(identity: JobIdentity, phase: JobPhase) -> Self {
        Self {
            identity,
            phase,
            responses: Vec::new(),
            diagnostics: None,
        }
    }

    pub fn with_responses(mut self, responses: Vec<serde_json::Value>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }
}

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[default]
    Normal,
    Warning,
    Error,
}

impl EventType {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("Warning") => Self::Warning,
            Some("Error") => Self::Error,
            _ => Self::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

/// Side-channel notification referencing a job by name.
///
/// Not ordered relative to [`JobRecord`] updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DiagnosticEvent {
    pub fn new(event_type: EventType, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            reason: reason.into(),
            message: message.into(),
            source: String::new(),
            timestamp: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether the reason names an error condition (`ErrorTimeout`,
    /// `QueryFailed`, `BackoffError`, ...).
    pub fn reason_indicates_error(&self) -> bool {
        let reason = self.reason.to_ascii_lowercase();
        reason.contains("error") || reason.contains("fail")
    }
}

/// UI lifecycle hints derived from phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Stop,
}

/// Why a merged stream ended without a clean post-grace close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "reason", content = "message")]
pub enum CloseReason {
    /// The job feed ended before any terminal phase was seen.
    Unexpected,
    /// The cancellation signal fired.
    Cancelled,
    /// The job feed reported a mid-stream failure.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unexpected => f.write_str("job feed closed before the job finished"),
            Self::Cancelled => f.write_str("monitoring cancelled"),
            Self::Error(msg) => write!(f, "job feed failed: {msg}"),
        }
    }
}

/// One item of the merged monitor stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedSignal {
    JobUpdate(JobRecord),
    Diagnostic(DiagnosticEvent),
    ControlCommand(ControlCommand),
    Closed(CloseReason),
}

impl MergedSignal {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobUpdate(_) => "job_update",
            Self::Diagnostic(_) => "diagnostic",
            Self::ControlCommand(_) => "control",
            Self::Closed(_) => "closed",
        }
    }
}

/// Client-perceived job lifecycle.
///
/// `Pending`/`Running` are soft states taken from the latest update,
/// `Done`/`Error` are authoritative, and `Cleaned` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientJobState {
    Submitted,
    Pending,
    Running,
    Done,
    Error,
    Cleaned,
}

impl ClientJobState {
    /// Apply an observed phase. Terminal and cleaned states are sticky.
    pub fn observe(self, phase: JobPhase) -> Self {
        match self {
            Self::Done | Self::Error | Self::Cleaned => self,
            _ => match phase {
                JobPhase::Pending => Self::Pending,
                JobPhase::Running => Self::Running,
                JobPhase::Done => Self::Done,
                JobPhase::Error => Self::Error,
            },
        }
    }

    /// Record that the delete call returned.
    pub fn cleaned(self) -> Self {
        Self::Cleaned
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cleaned)
    }
}
