// crates/core/src/progress.rs
//! Spinner state machine driven by merged signals.

use crate::types::{ControlCommand, JobPhase, MergedSignal};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpinnerState {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl SpinnerState {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Waiting for job to start",
            Self::Loading => "Running",
            Self::Success => "Done",
            Self::Error => "Failed",
        }
    }
}

/// Next spinner state after `signal`. `Success` and `Error` never change.
pub fn transition(state: SpinnerState, signal: &MergedSignal) -> SpinnerState {
    if state.is_final() {
        return state;
    }
    match signal {
        MergedSignal::ControlCommand(ControlCommand::Start) => SpinnerState::Loading,
        MergedSignal::JobUpdate(record) => match record.phase {
            JobPhase::Done => SpinnerState::Success,
            JobPhase::Error => SpinnerState::Error,
            JobPhase::Running => SpinnerState::Loading,
            JobPhase::Pending => state,
        },
        MergedSignal::Closed(_) => SpinnerState::Error,
        MergedSignal::ControlCommand(ControlCommand::Stop) | MergedSignal::Diagnostic(_) => state,
    }
}
