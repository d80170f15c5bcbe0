//! V4L2 MJPEG capture

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{FrameBuffer, FrameMetadata, PixelFormat};
use super::FrameSource;
use crate::error::CaptureError;
use crate::utils::lock;
use crate::CaptureConfig;

/// Sensor cadence requested from the driver; recording paces itself on top
const SENSOR_FPS: u32 = 30;

/// Frame source backed by a V4L2 capture device.
///
/// The driver's mmap buffers are requeued on the next dequeue, so each frame
/// is copied out. `buffer_count` still bounds how many frames the pipeline
/// may hold at once, like the sensor's frame buffers.
pub struct V4l2Source {
    stream: Mutex<MmapStream<'static>>,
    config: CaptureConfig,
    in_flight: AtomicUsize,
    sequence: AtomicU64,
    _device: Device,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Device(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Jpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            other => {
                return Err(CaptureError::Device(format!(
                    "unsupported pixel format {other:?}"
                )))
            }
        };
        let applied = device.set_format(&fmt)?;
        if applied.fourcc != fmt.fourcc {
            warn!("Driver picked {} instead of {}", applied.fourcc, fmt.fourcc);
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(SENSOR_FPS)) {
            debug!("Driver rejected frame interval: {}", e);
        }

        let stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count.max(1))?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        Ok(Self {
            stream: Mutex::new(stream),
            config,
            in_flight: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            _device: device,
        })
    }

    fn reserve(&self) -> bool {
        let limit = self.config.buffer_count.max(1) as usize;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip(self), level = "trace")]
    fn acquire(&self) -> FrameBuffer {
        if !self.reserve() {
            return FrameBuffer::invalid();
        }

        let captured_at = Instant::now();
        let data = {
            let mut stream = lock(&self.stream);
            match CaptureStream::next(&mut *stream) {
                Ok((buf, meta)) => {
                    let used = (meta.bytesused as usize).min(buf.len());
                    Bytes::copy_from_slice(&buf[..used])
                }
                Err(e) => {
                    warn!("V4L2 dequeue failed: {}", e);
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    return FrameBuffer::invalid();
                }
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = FrameMetadata {
            sequence,
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
            captured_at,
        };
        FrameBuffer::new(data, meta, 0)
    }

    fn release(&self, _buffer: FrameBuffer) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn current_format(&self) -> PixelFormat {
        self.config.format
    }
}
