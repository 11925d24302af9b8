// crates/core/src/lib.rs
//! Watch-merge execution monitor.
//!
//! Opens a job-record watch and a diagnostic-event watch against a control
//! plane, merges them into one bounded [`MergedStream`] and hands it to either
//! a blocking [`CompletionController`] or a push-style [`StreamTransport`].

pub mod cancel;
pub mod completion;
pub mod config;
pub mod error;
pub mod http;
pub mod merger;
pub mod plane;
pub mod progress;
pub mod transport;
pub mod types;
pub mod watch;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cancel::{CancelSource, CancellationController};
pub use completion::{derive_error_message, CompletionController, JobOutcome, Presenter, StopCause};
pub use config::{MonitorConfig, PlaneConfig};
pub use error::{ConfigError, MonitorError, TransportError, WatchError};
pub use http::HttpControlPlane;
pub use merger::{MergedStream, StreamMerger};
pub use plane::{ControlPlane, DeleteOutcome, Feed, ResourceChange};
pub use progress::SpinnerState;
pub use transport::{Frame, RelaySummary, StreamTransport};
pub use types::*;
pub use watch::{EventChangeWatcher, ResourceChangeWatcher, Subscription};
