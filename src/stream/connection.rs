//! Per-client multipart JPEG stream.
//!
//! Each part is acquired, sent and released before the next one is
//! acquired, so a client always sees the newest frame and a connection never
//! holds a buffer between parts.

use std::sync::Arc;

use tracing::{debug, trace};

use super::TelemetryCounter;
use crate::capture::{Frame, FrameSource, PixelFormat};
use crate::error::StreamError;

pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const PART_CONTENT_TYPE: &str = "image/jpeg";
pub const PART_TRAILER: &[u8] = b"\r\n";

/// Header preceding a part of `len` bytes.
pub fn part_header(len: usize) -> String {
    format!("--{BOUNDARY}\r\nContent-Type: {PART_CONTENT_TYPE}\r\nContent-Length: {len}\r\n\r\n")
}

/// Where a connection's bytes go. A send may block until the peer
/// accepts it; an error means the peer is gone.
pub trait ChunkSink {
    fn send(&mut self, chunk: &[u8]) -> Result<(), StreamError>;
}

impl ChunkSink for Vec<u8> {
    fn send(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// How a connection ended
#[derive(Debug)]
pub struct ConnectionSummary {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub ended_by: StreamError,
}

pub struct StreamingConnection {
    source: Arc<dyn FrameSource>,
    telemetry: Arc<TelemetryCounter>,
    frames_sent: u64,
    bytes_sent: u64,
}

impl StreamingConnection {
    /// Accept a client. Only JPEG frames can be streamed.
    pub fn accept(
        source: Arc<dyn FrameSource>,
        telemetry: Arc<TelemetryCounter>,
    ) -> Result<Self, StreamError> {
        let format = source.current_format();
        if format != PixelFormat::Jpeg {
            return Err(StreamError::FormatUnsupported(format));
        }

        Ok(Self {
            source,
            telemetry,
            frames_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Acquire one frame and send it as a multipart part.
    ///
    /// The frame is released once the send attempt is over, whether or not
    /// it succeeded. Returns the payload length.
    pub fn send_next<S: ChunkSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, StreamError> {
        let frame = Frame::acquire(&self.source).map_err(|_| StreamError::AcquisitionFailed)?;
        let len = frame.len();
        trace!(sequence = frame.meta().sequence, len, "Sending part");

        sink.send(part_header(len).as_bytes())?;
        sink.send(frame.data())?;
        sink.send(PART_TRAILER)?;
        drop(frame);

        self.frames_sent += 1;
        self.bytes_sent += len as u64;
        self.telemetry.add(len as u64);
        metrics::counter!("framecast_stream_bytes").increment(len as u64);
        Ok(len)
    }

    /// Stream until acquisition or a send fails.
    pub fn run<S: ChunkSink + ?Sized>(mut self, sink: &mut S) -> ConnectionSummary {
        let ended_by = loop {
            if let Err(e) = self.send_next(sink) {
                break e;
            }
        };
        debug!(
            frames = self.frames_sent,
            bytes = self.bytes_sent,
            "Stream ended: {}",
            ended_by
        );

        ConnectionSummary {
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            ended_by,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}
