// crates/core/src/http.rs
//! [`ControlPlane`] over a Kubernetes-style REST API.
//!
//! Watches are long-lived `GET ...?watch=true` requests whose body is a
//! sequence of newline-delimited JSON notifications:
//!
//! ```text
//! {"type":"ADDED","object":{...}}
//! {"type":"MODIFIED","object":{...}}
//! {"type":"ERROR","object":{"message":"too old resource version"}}
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt, TryStreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::config::PlaneConfig;
use crate::error::WatchError;
use crate::plane::{ControlPlane, DeleteOutcome, Feed, ResourceChange};
use crate::types::{DiagnosticEvent, EventType, JobIdentity, JobPhase, JobRecord};

/// Longest accepted notification line (1 MiB). Longer lines end the feed.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct WatchEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatusWire {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    responses: Vec<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    status: Option<JobStatusWire>,
}

#[derive(Debug, Default, Deserialize)]
struct EventSourceWire {
    #[serde(default)]
    component: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventObject {
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    source: Option<EventSourceWire>,
    #[serde(default)]
    reporting_component: Option<String>,
    #[serde(default)]
    last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusObject {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the control plane.
#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    config: PlaneConfig,
}

impl HttpControlPlane {
    pub fn new(config: PlaneConfig) -> Result<Self, WatchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PlaneConfig {
        &self.config
    }

    fn jobs_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/{}/{}/namespaces/{}/{}",
            self.config.api_url,
            self.config.group,
            self.config.version,
            urlencoding::encode(namespace),
            self.config.plural,
        )
    }

    fn events_url(&self, namespace: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/events",
            self.config.api_url,
            urlencoding::encode(namespace),
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Issue a watch request and split its body into notification lines.
    async fn open_lines(
        &self,
        feed: &'static str,
        job: &JobIdentity,
        url: &str,
        selector: String,
    ) -> Result<BoxStream<'static, Result<String, WatchError>>, WatchError> {
        let response = self
            .request(Method::GET, url)
            .query(&[("watch", "true"), ("fieldSelector", selector.as_str())])
            .send()
            .await
            .map_err(|e| WatchError::setup(feed, job, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<StatusObject>(&body)
                .ok()
                .and_then(|s| s.message)
                .unwrap_or(body);
            return Err(WatchError::setup(feed, job, format!("HTTP {status}: {detail}")));
        }

        info!(feed, job = %job, "watch opened");

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
            .map_err(|e| WatchError::feed(e.to_string()))
            .try_filter(|line| future::ready(!line.trim().is_empty()))
            .boxed();
        Ok(lines)
    }
}

fn decode_envelope(line: &str) -> Result<WatchEnvelope, WatchError> {
    serde_json::from_str(line).map_err(|e| WatchError::Decode {
        message: e.to_string(),
    })
}

fn error_notification(object: serde_json::Value) -> WatchError {
    let message = serde_json::from_value::<StatusObject>(object)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| "watch returned an error notification".to_string());
    WatchError::feed(message)
}

fn decode_job_change(line: &str, job: &JobIdentity) -> Result<ResourceChange, WatchError> {
    let envelope = decode_envelope(line)?;
    if envelope.kind == "ERROR" {
        return Err(error_notification(envelope.object));
    }
    let object: JobObject = serde_json::from_value(envelope.object).map_err(|e| WatchError::Decode {
        message: e.to_string(),
    })?;
    let status = object.status.unwrap_or_default();
    let record = JobRecord {
        identity: JobIdentity {
            name: object.metadata.name.unwrap_or_else(|| job.name.clone()),
            namespace: object
                .metadata
                .namespace
                .unwrap_or_else(|| job.namespace.clone()),
        },
        phase: JobPhase::parse(status.phase.as_deref()),
        responses: status.responses,
        diagnostics: status.message,
    };
    match envelope.kind.as_str() {
        "ADDED" => Ok(ResourceChange::Added(record)),
        "DELETED" => Ok(ResourceChange::Deleted(record)),
        _ => Ok(ResourceChange::Modified(record)),
    }
}

fn decode_event(line: &str) -> Result<Option<DiagnosticEvent>, WatchError> {
    let envelope = decode_envelope(line)?;
    match envelope.kind.as_str() {
        "ERROR" => return Err(error_notification(envelope.object)),
        // An event object being garbage-collected is not a new diagnostic.
        "DELETED" => return Ok(None),
        _ => {}
    }
    let object: EventObject = serde_json::from_value(envelope.object).map_err(|e| WatchError::Decode {
        message: e.to_string(),
    })?;
    let source = object
        .source
        .and_then(|s| s.component)
        .or(object.reporting_component)
        .unwrap_or_default();
    Ok(Some(DiagnosticEvent {
        event_type: EventType::parse(object.event_type.as_deref()),
        reason: object.reason.unwrap_or_default(),
        message: object.message.unwrap_or_default(),
        source,
        timestamp: object.event_time.or(object.last_timestamp),
    }))
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn watch_job(&self, job: &JobIdentity) -> Result<Feed<ResourceChange>, WatchError> {
        let url = self.jobs_url(&job.namespace);
        let selector = format!("metadata.name={}", job.name);
        let lines = self.open_lines("job", job, &url, selector).await?;
        let job = job.clone();
        Ok(lines
            .and_then(move |line| future::ready(decode_job_change(&line, &job)))
            .boxed())
    }

    async fn watch_events(&self, job: &JobIdentity) -> Result<Feed<DiagnosticEvent>, WatchError> {
        let url = self.events_url(&job.namespace);
        let selector = format!("involvedObject.name={}", job.name);
        let lines = self.open_lines("event", job, &url, selector).await?;
        Ok(lines
            .and_then(|line| future::ready(decode_event(&line)))
            .try_filter_map(future::ok)
            .boxed())
    }

    async fn delete_job(&self, job: &JobIdentity) -> Result<DeleteOutcome, WatchError> {
        let url = format!("{}/{}", self.jobs_url(&job.namespace), urlencoding::encode(&job.name));
        let response = self.request(Method::DELETE, &url).send().await.map_err(|e| WatchError::Delete {
            job: job.clone(),
            message: e.to_string(),
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(job = %job, "delete: job already gone");
                Ok(DeleteOutcome::AlreadyGone)
            }
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            status => Err(WatchError::Delete {
                job: job.clone(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plane_for(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(PlaneConfig {
            api_url: server.uri(),
            token: Some("s3cret".to_string()),
            ..PlaneConfig::default()
        })
        .unwrap()
    }

    fn job() -> JobIdentity {
        JobIdentity::new("q-42", "default")
    }

    #[test]
    fn test_decode_job_change_defaults() {
        let line = r#"{"type":"ADDED","object":{"metadata":{"name":"q-42"}}}"#;
        let change = decode_job_change(line, &job()).unwrap();
        assert_eq!(change, ResourceChange::Added(JobRecord::new(job(), JobPhase::Pending)));
    }

    #[test]
    fn test_decode_error_notification() {
        let line = r#"{"type":"ERROR","object":{"kind":"Status","message":"too old resource version"}}"#;
        let err = decode_job_change(line, &job()).unwrap_err();
        assert!(matches!(err, WatchError::Feed { ref message } if message == "too old resource version"));
    }

    #[test]
    fn test_decode_event_prefers_event_time() {
        let line = r#"{"type":"ADDED","object":{"type":"Warning","reason":"ErrorTimeout","message":"timed out",
            "reportingComponent":"query-controller","eventTime":"2026-01-01T00:00:00.000001Z",
            "lastTimestamp":"2025-01-01T00:00:00Z"}}"#;
        let event = decode_event(line).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::Warning);
        assert_eq!(event.reason, "ErrorTimeout");
        assert_eq!(event.source, "query-controller");
        assert_eq!(event.timestamp.unwrap().to_rfc3339(), "2026-01-01T00:00:00.000001+00:00");
    }

    #[test]
    fn test_decode_event_skips_deleted() {
        let line = r#"{"type":"DELETED","object":{"reason":"Started"}}"#;
        assert!(decode_event(line).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_job_streams_changes() {
        let server = MockServer::start().await;
        let body = [
            r#"{"type":"ADDED","object":{"metadata":{"name":"q-42","namespace":"default"},"status":{"phase":"pending"}}}"#,
            "",
            r#"{"type":"MODIFIED","object":{"metadata":{"name":"q-42","namespace":"default"},"status":{"phase":"done","responses":[{"content":"ok"}]}}}"#,
        ]
        .join("\n");
        Mock::given(method("GET"))
            .and(path("/apis/jobwatch.dev/v1alpha1/namespaces/default/queries"))
            .and(query_param("watch", "true"))
            .and(query_param("fieldSelector", "metadata.name=q-42"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let feed = plane_for(&server).watch_job(&job()).await.unwrap();
        let changes: Vec<_> = feed.collect().await;
        assert_eq!(changes.len(), 2);
        let last = changes[1].as_ref().unwrap();
        assert!(matches!(last, ResourceChange::Modified(_)));
        assert_eq!(last.record().phase, JobPhase::Done);
        assert_eq!(last.record().responses[0]["content"], "ok");
    }

    #[tokio::test]
    async fn test_watch_events_filters_by_involved_object() {
        let server = MockServer::start().await;
        let body = r#"{"type":"ADDED","object":{"type":"Normal","reason":"Started","message":"go","source":{"component":"ctrl"}}}"#;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/events"))
            .and(query_param("fieldSelector", "involvedObject.name=q-42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let feed = plane_for(&server).watch_events(&job()).await.unwrap();
        let events: Vec<_> = feed.try_collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "Started");
        assert_eq!(events[0].source, "ctrl");
    }

    #[tokio::test]
    async fn test_watch_setup_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string(r#"{"kind":"Status","message":"forbidden: no access"}"#),
            )
            .mount(&server)
            .await;

        let err = match plane_for(&server).watch_job(&job()).await {
            Err(e) => e,
            Ok(_) => panic!("expected setup failure"),
        };
        assert!(matches!(err, WatchError::Setup { feed: "job", .. }));
        assert!(err.to_string().contains("forbidden: no access"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/apis/jobwatch.dev/v1alpha1/namespaces/default/queries/q-42"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let plane = plane_for(&server);
        assert_eq!(plane.delete_job(&job()).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(plane.delete_job(&job()).await.unwrap(), DeleteOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_delete_server_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = plane_for(&server).delete_job(&job()).await.unwrap_err();
        assert!(matches!(err, WatchError::Delete { .. }));
    }
}
