//! Atomic result files.
//!
//! Files are written as:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<path>`
//! 4. fsync the parent directory
//!
//! Readers therefore see either no file or a complete one.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::{RepoId, RepoResult};

/// Errors from writing or reading result files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `value` to `path` atomically, creating parent directories.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    write_bytes_atomic(path, &bytes)?;
    Ok(())
}

pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Writes `result` to `<results_dir>/<id>.json` and returns the path.
///
/// The id comes from the metadata; `fallback` (the task's id) is used if the
/// metadata has none.
pub fn persist_result(
    results_dir: &Path,
    result: &RepoResult,
    fallback: RepoId,
) -> Result<PathBuf, StoreError> {
    let path = results_dir.join(result.file_name(fallback));
    write_json_atomic(&path, result)?;
    Ok(path)
}

/// Reads a persisted result back.
pub fn load_result(path: &Path) -> Result<RepoResult, StoreError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
