//! Integration tests for the SSE viewer endpoint.
//!
//! The in-memory control plane is scripted from a background task after the
//! handler has opened its subscriptions; the test then reads the whole SSE
//! body, which ends once the monitor closes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use jobwatch_core::testing::FakeControlPlane;
use jobwatch_core::{DiagnosticEvent, EventType, JobIdentity, JobPhase, MonitorConfig};
use jobwatch_server::{create_app, AppState};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

fn job() -> JobIdentity {
    JobIdentity::new("nightly-report", "analytics")
}

async fn open(plane: &Arc<FakeControlPlane>, uri: &str) -> Response {
    let app = create_app(AppState::new(plane.clone(), MonitorConfig::default()));
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse every `data:` line of an SSE body as JSON.
fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("frame is JSON"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_stream_relays_frames_until_completed() {
    let plane = FakeControlPlane::new();
    let response = open(&plane, "/api/jobs/analytics/nightly-report/stream").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let driver = {
        let plane = plane.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            plane.push_phase(&job(), JobPhase::Running);
            tokio::time::sleep(Duration::from_millis(5)).await;
            plane.push_event(
                DiagnosticEvent::new(EventType::Normal, "Started", "query started")
                    .with_source("query-operator"),
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
            plane.push_phase(&job(), JobPhase::Done);
        })
    };

    let frames = sse_frames(&body_string(response).await);
    driver.await.unwrap();

    let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["query", "kubernetes_event", "query", "completed"]);
    assert_eq!(frames[0]["phase"], "running");
    assert_eq!(frames[1]["source"], "query-operator");
    assert_eq!(frames[2]["query"]["identity"]["name"], "nightly-report");

    // Viewers never clean up, and the monitor released its feeds.
    assert!(plane.delete_calls().is_empty());
    assert_eq!(plane.closed_subscriptions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_is_an_error_frame() {
    let plane = FakeControlPlane::new();
    let response = open(&plane, "/api/jobs/analytics/nightly-report/stream").await;

    let driver = {
        let plane = plane.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            plane.end_job_feed();
        })
    };

    let frames = sse_frames(&body_string(response).await);
    driver.await.unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[1]["type"], "completed");
}

#[tokio::test]
async fn test_setup_failure_is_bad_gateway() {
    let plane = FakeControlPlane::new();
    plane.fail_job_watch_setup(true);

    let response = open(&plane, "/api/jobs/analytics/nightly-report/stream").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "Failed to watch job");
    assert!(body["details"].as_str().unwrap().contains("analytics/nightly-report"));
}

#[tokio::test]
async fn test_invalid_job_name_is_rejected() {
    let plane = FakeControlPlane::new();
    let response = open(&plane, "/api/jobs/analytics/Nightly_Report/stream").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(plane.opened_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_viewers_get_independent_monitors() {
    let plane = FakeControlPlane::new();
    let first = open(&plane, "/api/jobs/analytics/nightly-report/stream").await;
    let second = open(&plane, "/api/jobs/analytics/nightly-report/stream").await;
    assert_eq!(plane.opened_subscriptions(), 4);

    // The first viewer disconnects before anything happens.
    drop(first);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(plane.closed_subscriptions(), 2);

    plane.push_phase(&job(), JobPhase::Done);
    let frames = sse_frames(&body_string(second).await);
    assert_eq!(frames.last().unwrap()["type"], "completed");
    assert_eq!(plane.closed_subscriptions(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_health_counts_open_monitors() {
    let plane = FakeControlPlane::new();
    let state = AppState::new(plane.clone(), MonitorConfig::default());
    let request = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

    let viewer = create_app(state.clone())
        .oneshot(request("/api/jobs/analytics/nightly-report/stream"))
        .await
        .unwrap();
    let health = create_app(state.clone()).oneshot(request("/api/health")).await.unwrap();
    let body: Value = serde_json::from_str(&body_string(health).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_monitors"], 1);

    drop(viewer);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(state.active_monitors(), 0);
    assert_eq!(plane.closed_subscriptions(), 2);
}
