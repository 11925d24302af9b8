// crates/core/src/cancel.rs
//! One-shot cancellation shared by timeout, process signals and the UI.
//!
//! Any number of sources may fire; the first one wins and is remembered.
//! Later calls are no-ops.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What triggered cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    Timeout,
    Signal,
    UserInterrupt,
}

impl fmt::Display for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::Signal => f.write_str("interrupted by signal"),
            Self::UserInterrupt => f.write_str("interrupted by user"),
        }
    }
}

struct Inner {
    token: CancellationToken,
    winner: OnceLock<CancelSource>,
}

/// Cloneable cancellation latch.
#[derive(Clone)]
pub struct CancellationController {
    inner: Arc<Inner>,
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                winner: OnceLock::new(),
            }),
        }
    }

    /// Fire cancellation. Returns `true` only for the call that won.
    pub fn cancel(&self, source: CancelSource) -> bool {
        if self.inner.winner.set(source).is_err() {
            debug!(source = ?source, "cancellation already fired");
            return false;
        }
        info!(source = %source, "cancelling");
        self.inner.token.cancel();
        true
    }

    /// Shorthand for a UI-initiated cancel.
    pub fn interrupt(&self) -> bool {
        self.cancel(CancelSource::UserInterrupt)
    }

    /// Token observed by the merger. Cancelled together with this latch.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// The source that won, once fired.
    pub fn source(&self) -> Option<CancelSource> {
        self.inner.winner.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Fire [`CancelSource::Timeout`] after `after`, unless something else
    /// fires first.
    pub fn arm_timeout(&self, after: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    this.cancel(CancelSource::Timeout);
                }
            }
        })
    }

    /// Fire [`CancelSource::Signal`] on Ctrl-C (and SIGTERM on unix).
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.cancelled() => {}
                _ = shutdown_signal() => {
                    this.cancel(CancelSource::Signal);
                }
            }
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_source_wins() {
        let cancel = CancellationController::new();
        assert!(!cancel.is_cancelled());
        assert_eq!(cancel.source(), None);

        assert!(cancel.interrupt());
        assert!(!cancel.cancel(CancelSource::Timeout));
        assert!(!cancel.cancel(CancelSource::Signal));

        assert!(cancel.is_cancelled());
        assert_eq!(cancel.source(), Some(CancelSource::UserInterrupt));
    }

    #[test]
    fn test_tokens_follow_the_latch() {
        let cancel = CancellationController::new();
        let token = cancel.token();
        let clone = cancel.clone();
        clone.cancel(CancelSource::Signal);
        assert!(token.is_cancelled());
        assert_eq!(cancel.source(), Some(CancelSource::Signal));
    }

    #[test]
    fn test_cancelled_wakes_waiters() {
        let cancel = CancellationController::new();
        let mut waiter = tokio_test::task::spawn(cancel.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        cancel.cancel(CancelSource::Signal);
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let cancel = CancellationController::new();
        let handle = cancel.arm_timeout(Duration::from_secs(1));
        cancel.cancelled().await;
        handle.await.unwrap();
        assert_eq!(cancel.source(), Some(CancelSource::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_cancel_disarms_timeout() {
        let cancel = CancellationController::new();
        let handle = cancel.arm_timeout(Duration::from_secs(1));
        cancel.interrupt();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cancel.source(), Some(CancelSource::UserInterrupt));
    }
}
