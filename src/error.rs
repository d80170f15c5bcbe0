//! Error types for the capture, recording and streaming paths.
//!
//! Nothing here is fatal to the whole device: recorder errors end one
//! session, stream errors end one connection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::frame::PixelFormat;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Source exhausted or hardware busy; the buffer came back invalid
    #[error("frame acquisition failed")]
    AcquisitionFailed,

    #[error("capture device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage medium not present at {0}")]
    Unavailable(PathBuf),

    #[error("invalid destination {0:?}")]
    InvalidDestination(String),

    #[error("failed to open {path} for append: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("a recording session is already running")]
    AlreadyRunning,

    #[error("storage medium is not present")]
    StorageUnavailable,

    #[error("frame rate must be at least 1 fps")]
    InvalidFrameRate,

    #[error("failed to spawn {task} task: {source}")]
    Spawn {
        task: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("streaming requires JPEG frames, camera is producing {0:?}")]
    FormatUnsupported(PixelFormat),

    #[error("frame acquisition failed")]
    AcquisitionFailed,

    #[error("send to client failed")]
    SendFailed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
