use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// Lock a mutex, recovering the data if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pin the calling thread to `core`, if the platform exposes that core.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        debug!("Core affinity not supported on this platform");
        return false;
    };

    match ids.into_iter().find(|id| id.id == core) {
        Some(id) => core_affinity::set_for_current(id),
        None => {
            warn!("Core {} not available, thread left unpinned", core);
            false
        }
    }
}

#[cfg(feature = "v4l2")]
pub use self::v4l2_detect::{auto_detect_device, FoundDevice};

#[cfg(feature = "v4l2")]
mod v4l2_detect {
    use std::path::Path;

    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    use crate::capture::PixelFormat;
    use crate::error::CaptureError;

    // Detected capture device info
    #[derive(Debug, Clone)]
    pub struct FoundDevice {
        pub path: String,
        pub format: PixelFormat,
    }

    /// Find the first capture device, preferring one that speaks MJPEG.
    pub fn auto_detect_device() -> Result<FoundDevice, CaptureError> {
        info!("Auto-detecting capture devices...");

        let mut fallback = None;
        for i in 0..10 {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }

            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }

            if let Ok(formats) = dev.enum_formats() {
                for fmt in formats {
                    if fmt.fourcc == FourCC::new(b"MJPG") {
                        info!("Found MJPEG device: {} - {}", path, caps.card);
                        return Ok(FoundDevice {
                            path,
                            format: PixelFormat::Jpeg,
                        });
                    } else if fmt.fourcc == FourCC::new(b"YUYV") && fallback.is_none() {
                        info!("Found YUYV device: {} - {}", path, caps.card);
                        fallback = Some(FoundDevice {
                            path: path.clone(),
                            format: PixelFormat::Yuyv,
                        });
                    }
                }
            }
        }

        fallback.ok_or_else(|| CaptureError::Device("no suitable capture device found".into()))
    }
}
