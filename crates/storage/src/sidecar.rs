//! Sidecar files and crash-safe writes.
//!
//! Every write goes to a temporary file next to the target and is renamed into
//! place, so a failed write never leaves a half-written target behind.

use crate::StorageError;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Sidecar path for a document: same directory and base name, new extension.
///
/// ```
/// use std::path::Path;
/// use storage::sidecar_path;
///
/// let path = sidecar_path(Path::new("/notes/lecture.pdf"), "json");
/// assert_eq!(path, Path::new("/notes/lecture.json"));
/// ```
pub fn sidecar_path(document: &Path, extension: &str) -> PathBuf {
    document.with_extension(extension)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Returns `None` when the file does not exist.
pub async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Returns whether a file was removed.
pub async fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    StagedWrite::stage(path, bytes).await?.commit().await
}

/// A write that has reached disk under a temporary name but has not replaced
/// its target yet. Staging several files first lets a caller abort all of them
/// when any one fails.
#[derive(Debug)]
#[must_use = "a staged write does nothing until committed or aborted"]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    pub async fn stage(target: &Path, bytes: &[u8]) -> Result<Self, StorageError> {
        let temp = temp_path(target);

        if let Err(err) = fs::write(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        debug!(target = %target.display(), bytes = bytes.len(), "staged write");
        Ok(Self { temp, target: target.to_path_buf() })
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        if let Err(err) = fs::rename(&self.temp, &self.target).await {
            let _ = fs::remove_file(&self.temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn abort(self) {
        let _ = fs::remove_file(&self.temp).await;
    }
}
