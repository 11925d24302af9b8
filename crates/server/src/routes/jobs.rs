// crates/server/src/routes/jobs.rs
//! Viewer endpoint for one job.
//!
//! - GET /jobs/{namespace}/{name}/stream - SSE relay of a fresh monitor
//!
//! The relay never deletes the job. Closing the connection drops the SSE
//! stream, which drops the merged stream and releases both subscriptions.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::{Stream, StreamExt};
use jobwatch_core::{JobIdentity, StreamMerger, StreamTransport};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Object names the control plane accepts: lowercase alphanumerics, `-` and `.`.
fn validate_name(kind: &str, value: &str) -> ApiResult<()> {
    let valid = !value.is_empty()
        && value.len() <= 253
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid {kind}: {value:?}")))
    }
}

/// GET /api/jobs/{namespace}/{name}/stream
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    validate_name("namespace", &namespace)?;
    validate_name("job name", &name)?;

    let job = JobIdentity::new(name, namespace);
    let merger = StreamMerger::new(state.plane.clone(), state.monitor.clone());
    let stream = merger.start(job.clone(), state.shutdown.child_token()).await?;
    tracing::info!(job = %job, active = state.active_monitors() + 1, "viewer attached");

    let monitor = state.track_monitor();
    let events = StreamTransport::frames(stream).map(move |frame| {
        let _monitor = &monitor;
        let json = serde_json::to_string(&frame).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(json))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{namespace}/{name}/stream", get(stream_job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("job name", "nightly-report.v2").is_ok());
        assert!(validate_name("job name", "Nightly").is_err());
        assert!(validate_name("job name", "a/b").is_err());
        assert!(validate_name("job name", "").is_err());
    }
}
