// crates/core/src/transport.rs
//! Push-style relay of a merged stream to one remote viewer.
//!
//! Frames are written as `data: {json}\n\n` and flushed one at a time. The
//! transport never deletes the job: other viewers may still be attached.

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::TransportError;
use crate::merger::MergedStream;
use crate::types::{EventType, JobPhase, JobRecord, MergedSignal};

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Query {
        phase: JobPhase,
        query: JobRecord,
    },
    KubernetesEvent {
        #[serde(rename = "eventType")]
        event_type: EventType,
        reason: String,
        message: String,
        source: String,
    },
    Error {
        message: String,
    },
    Completed,
}

impl Frame {
    /// Wire frame for `signal`. Control commands are UI-only and map to `None`.
    pub fn from_signal(signal: MergedSignal) -> Option<Self> {
        match signal {
            MergedSignal::JobUpdate(record) => Some(Self::Query {
                phase: record.phase,
                query: record,
            }),
            MergedSignal::Diagnostic(event) => Some(Self::KubernetesEvent {
                event_type: event.event_type,
                reason: event.reason,
                message: event.message,
                source: event.source,
            }),
            MergedSignal::ControlCommand(_) => None,
            MergedSignal::Closed(reason) => Some(Self::Error {
                message: reason.to_string(),
            }),
        }
    }

    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// What a finished relay wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub frames: usize,
    /// Message of the `error` frame, when the monitor closed abnormally.
    pub error: Option<String>,
}

impl RelaySummary {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

pub struct StreamTransport;

impl StreamTransport {
    /// Wire frames for `stream`, ending with one `completed` frame.
    ///
    /// Dropping the returned stream drops `stream` and tears down its monitor.
    pub fn frames(mut stream: MergedStream) -> impl Stream<Item = Frame> + Send + 'static {
        async_stream::stream! {
            while let Some(signal) = stream.recv().await {
                if let Some(frame) = Frame::from_signal(signal) {
                    yield frame;
                }
            }
            yield Frame::Completed;
        }
    }

    /// Write every frame of `stream` to `writer` as `data: {json}\n\n`.
    ///
    /// A write failure ends this relay only.
    pub async fn relay<W>(stream: MergedStream, writer: &mut W) -> Result<RelaySummary, TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let job = stream.job().clone();
        let frames = Self::frames(stream);
        tokio::pin!(frames);

        let mut summary = RelaySummary::default();
        while let Some(frame) = frames.next().await {
            if let Err(e) = write_frame(writer, &frame).await {
                debug!(job = %job, error = %e, "viewer disconnected, stopping relay");
                return Err(e);
            }
            summary.frames += 1;
            if let Frame::Error { message } = frame {
                summary.error = Some(message);
            }
        }
        debug!(job = %job, frames = summary.frames, clean = summary.is_clean(), "relay finished");
        Ok(summary)
    }
}

async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let payload = frame.to_sse()?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
