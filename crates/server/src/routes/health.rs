// crates/server/src/routes/health.rs
//! Liveness plus a snapshot of the monitors this server is running.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown has begun.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// SSE viewers whose monitor is still open.
    pub active_monitors: usize,
    /// Diagnostic drain window applied after a terminal phase.
    pub grace_period_ms: u64,
}

impl HealthResponse {
    fn snapshot(state: &AppState) -> Self {
        let status = if state.shutdown.is_cancelled() { "draining" } else { "ok" };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            active_monitors: state.active_monitors(),
            grace_period_ms: state.monitor.grace_period.as_millis() as u64,
        }
    }
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(&state))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
