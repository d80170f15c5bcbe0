pub mod frame;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::sync::Arc;

pub use frame::{Frame, FrameBuffer, FrameMetadata, PixelFormat};
pub use synthetic::{SourceStats, SyntheticConfig, SyntheticSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;

use crate::error::CaptureError;
use crate::{CaptureConfig, SourceKind};

/// The capture device as seen by the pipeline.
///
/// `acquire` may be called concurrently by the recorder and any number of
/// streaming connections; implementations arbitrate access themselves.
/// `release` is not idempotent, so callers go through [`Frame`], which
/// releases exactly once.
pub trait FrameSource: Send + Sync {
    /// Hand out one frame, or [`FrameBuffer::invalid`] if none is available.
    fn acquire(&self) -> FrameBuffer;

    /// Return a buffer obtained from `acquire`.
    fn release(&self, buffer: FrameBuffer);

    /// Encoding the sensor is currently producing.
    fn current_format(&self) -> PixelFormat;
}

/// Build the frame source named by the capture configuration.
pub fn open_source(config: &CaptureConfig) -> Result<Arc<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::Synthetic => Ok(Arc::new(SyntheticSource::new(SyntheticConfig::from(
            config,
        )))),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            let mut config = config.clone();
            if config.device.is_empty() {
                let found = crate::utils::auto_detect_device()?;
                config.device = found.path;
                config.format = found.format;
            }
            Ok(Arc::new(V4l2Source::new(config)?))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(CaptureError::Device(
            "built without the `v4l2` feature".into(),
        )),
    }
}
