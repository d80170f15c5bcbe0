use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::FrameSource;
use crate::error::CaptureError;

/// One captured frame as handed out by a [`FrameSource`].
///
/// Not `Clone`: a buffer is owned by exactly one stage at a
/// time and goes back to its source exactly once.
pub struct FrameBuffer {
    /// Compressed frame bytes, never inspected by the pipeline
    data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Source-private buffer index
    slot: usize,

    valid: bool,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture timestamp for latency and pacing checks
    pub captured_at: Instant,
}

/// Pixel formats a sensor can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    Yuyv,
    Rgb565,
    Rgb24,
    Grayscale,
}

impl FrameBuffer {
    pub fn new(data: Bytes, meta: FrameMetadata, slot: usize) -> Self {
        Self {
            data,
            meta,
            slot,
            valid: true,
        }
    }

    /// Buffer returned when the source had nothing to hand out.
    pub fn invalid() -> Self {
        Self {
            data: Bytes::new(),
            meta: FrameMetadata {
                sequence: 0,
                width: 0,
                height: 0,
                format: PixelFormat::Jpeg,
                captured_at: Instant::now(),
            },
            slot: usize::MAX,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .field("slot", &self.slot)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Scoped acquisition of a [`FrameBuffer`].
///
/// The buffer goes back to its source when the `Frame` is dropped, so every
/// exit path (early return, `?`, unwinding, a full queue being dropped)
/// releases it exactly once. Moving the `Frame` moves ownership.
pub struct Frame {
    buffer: Option<FrameBuffer>,
    source: Arc<dyn FrameSource>,
}

impl Frame {
    /// Acquire one frame. Invalid buffers are never released.
    pub fn acquire(source: &Arc<dyn FrameSource>) -> Result<Self, CaptureError> {
        let buffer = source.acquire();
        if !buffer.is_valid() {
            return Err(CaptureError::AcquisitionFailed);
        }

        Ok(Self {
            buffer: Some(buffer),
            source: Arc::clone(source),
        })
    }

    pub fn buffer(&self) -> &FrameBuffer {
        // Only `Drop` takes the buffer out.
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("frame buffer already released"),
        }
    }

    pub fn data(&self) -> &[u8] {
        self.buffer().data()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.buffer().meta
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.source.release(buffer);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.buffer).finish()
    }
}
