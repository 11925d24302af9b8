// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use jobwatch_core::{ControlPlane, MonitorConfig};
use tokio_util::sync::CancellationToken;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Control plane every monitor watches and reads from.
    pub plane: Arc<dyn ControlPlane>,
    /// Tuning applied to each per-connection monitor.
    pub monitor: MonitorConfig,
    /// Cancelled on shutdown; each monitor holds a child token.
    pub shutdown: CancellationToken,
    active_monitors: AtomicUsize,
}

impl AppState {
    pub fn new(plane: Arc<dyn ControlPlane>, monitor: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            plane,
            monitor,
            shutdown: CancellationToken::new(),
            active_monitors: AtomicUsize::new(0),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Count a viewer's monitor until the returned guard drops.
    pub fn track_monitor(self: &Arc<Self>) -> MonitorGuard {
        self.active_monitors.fetch_add(1, Ordering::Relaxed);
        MonitorGuard { state: self.clone() }
    }

    pub fn active_monitors(&self) -> usize {
        self.active_monitors.load(Ordering::Relaxed)
    }
}

/// Held by an SSE body for as long as its monitor runs.
pub struct MonitorGuard {
    state: Arc<AppState>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.state.active_monitors.fetch_sub(1, Ordering::Relaxed);
    }
}
