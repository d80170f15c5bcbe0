pub mod capture;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod stream;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameBuffer, FrameSource};
pub use error::{CaptureError, ConfigError, RecorderError, StorageError, StreamError};
pub use pipeline::{FrameQueue, Recorder, RecorderState, SessionReport};
pub use storage::{FsStorage, Storage};
pub use stream::{StreamingConnection, TelemetryCounter};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FRAMECAST_CONFIG";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub recorder: RecorderConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device node for the V4L2 source; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Frame buffers the driver may hand out at once
    pub buffer_count: u32,
    /// How long an acquire may wait for a free buffer before failing
    pub acquire_timeout_ms: u64,
    pub synthetic_frame_bytes: usize,
    /// Simulated sensor readout time per synthetic frame
    pub synthetic_frame_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub fps: u32,
    pub queue_capacity: usize,
    pub stop_timeout_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub pin_cores: bool,
    pub capture_core: usize,
    pub writer_core: usize,
    /// Destination to start recording to at launch
    pub autostart: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub stream_path: String,
    pub telemetry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Mount point of the storage medium
    pub root: PathBuf,
}

impl RecorderConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                source: SourceKind::Synthetic,
                device: "/dev/video0".into(),
                width: 640,
                height: 480,
                format: PixelFormat::Jpeg,
                buffer_count: 2,
                acquire_timeout_ms: 4000,
                synthetic_frame_bytes: 24 * 1024,
                synthetic_frame_interval_ms: 33,
            },
            recorder: RecorderConfig {
                fps: 30,
                queue_capacity: 2,
                stop_timeout_ms: 6000,
                dequeue_timeout_ms: 1000,
                retry_backoff_ms: 1,
                pin_cores: true,
                capture_core: 1,
                writer_core: 0,
                autostart: None,
            },
            server: ServerConfig {
                enabled: true,
                bind_address: "0.0.0.0".into(),
                port: 81,
                stream_path: "/stream".into(),
                telemetry_interval_ms: 1000,
            },
            storage: StorageConfig {
                root: PathBuf::from("/sdcard"),
            },
        }
    }
}

impl Config {
    /// Load defaults, then `framecast.toml` (or `$FRAMECAST_CONFIG`), then
    /// `FRAMECAST__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "framecast.toml".into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("FRAMECAST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recorder.fps == 0 {
            return Err(ConfigError::Invalid("recorder.fps must be at least 1".into()));
        }
        if self.recorder.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "recorder.queue_capacity must be at least 1".into(),
            ));
        }
        if self.capture.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "capture.buffer_count must be at least 1".into(),
            ));
        }
        if !self.server.stream_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.stream_path must start with '/': {}",
                self.server.stream_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_device() {
        let config = Config::default();
        assert_eq!(config.recorder.queue_capacity, 2);
        assert_eq!(config.recorder.stop_timeout(), Duration::from_secs(6));
        assert_eq!(config.recorder.dequeue_timeout(), Duration::from_secs(1));
        assert_eq!(config.server.port, 81);
        assert_eq!(config.capture.format, PixelFormat::Jpeg);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[recorder]\nfps = 12\nautostart = \"clip.mjpeg\"\n\n[server]\nport = 8081"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.recorder.fps, 12);
        assert_eq!(config.recorder.autostart.as_deref(), Some("clip.mjpeg"));
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.stream_path, "/stream");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.recorder.fps, 30);
    }

    #[test]
    fn rejects_zero_fps() {
        let mut config = Config::default();
        config.recorder.fps = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
