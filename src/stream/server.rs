//! HTTP endpoint serving the multipart stream.
//!
//! Each request gets its own [`StreamingConnection`] running on a blocking
//! thread, since frame acquisition blocks on the driver. Parts reach the
//! response body through a small bounded channel; when the client goes
//! away hyper drops the body, the next send fails and the connection ends.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::connection::{ChunkSink, StreamingConnection, STREAM_CONTENT_TYPE};
use super::TelemetryCounter;
use crate::capture::FrameSource;
use crate::error::StreamError;

/// Chunks buffered between a connection thread and its response body;
/// one part is three chunks.
const CHUNKS_IN_FLIGHT: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn FrameSource>,
    pub telemetry: Arc<TelemetryCounter>,
}

impl AppState {
    pub fn new(source: Arc<dyn FrameSource>, telemetry: Arc<TelemetryCounter>) -> Self {
        Self { source, telemetry }
    }
}

pub fn router(state: AppState, stream_path: &str) -> Router {
    Router::new()
        .route(stream_path, get(stream_handler))
        .with_state(state)
}

struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChunkSink for ChannelSink {
    fn send(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(chunk)))
            .map_err(|_| StreamError::SendFailed)
    }
}

async fn stream_handler(State(state): State<AppState>) -> Response {
    let connection = match StreamingConnection::accept(state.source, state.telemetry) {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Refusing stream client: {}", e);
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()).into_response();
        }
    };

    let (tx, rx) = mpsc::channel(CHUNKS_IN_FLIGHT);
    tokio::task::spawn_blocking(move || {
        metrics::gauge!("framecast_stream_connections").increment(1.0);
        info!("Stream client connected");

        let mut sink = ChannelSink { tx };
        let summary = connection.run(&mut sink);
        if let StreamError::AcquisitionFailed = summary.ended_by {
            // abort the response instead of ending it cleanly
            let _ = sink
                .tx
                .blocking_send(Err(io::Error::other("frame acquisition failed")));
        }

        metrics::gauge!("framecast_stream_connections").decrement(1.0);
        info!(
            frames = summary.frames_sent,
            bytes = summary.bytes_sent,
            "Stream client disconnected: {}",
            summary.ended_by
        );
    });

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
