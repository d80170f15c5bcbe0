//! Storage medium for recordings.
//!
//! Recordings are raw concatenations of frame payloads; a writer is any
//! `Write` and closing it is flush plus drop.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;

pub type StorageWriter = Box<dyn Write + Send>;

pub trait Storage: Send + Sync {
    /// Whether the medium is mounted/inserted.
    fn is_present(&self) -> bool;

    /// Open `destination` for sequential append, creating it if needed.
    fn open_append(&self, destination: &str) -> Result<StorageWriter, StorageError>;
}

/// Storage rooted at a mount directory, e.g. an SD card at `/sdcard`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a card-style path (`/clip.mjpeg`) under the root. Paths that
    /// would escape the root are refused.
    pub fn resolve(&self, destination: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(destination.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        let mut has_name = false;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    has_name = true;
                }
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidDestination(destination.to_string())),
            }
        }

        if !has_name {
            return Err(StorageError::InvalidDestination(destination.to_string()));
        }
        Ok(resolved)
    }
}

impl Storage for FsStorage {
    fn is_present(&self) -> bool {
        self.root.is_dir()
    }

    fn open_append(&self, destination: &str) -> Result<StorageWriter, StorageError> {
        if !self.is_present() {
            return Err(StorageError::Unavailable(self.root.clone()));
        }

        let path = self.resolve(destination)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        debug!("Opened {} for append", path.display());
        Ok(Box::new(file))
    }
}
