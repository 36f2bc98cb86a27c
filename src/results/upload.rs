//! Hand-off of finished result files to the upload target.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::store::write_bytes_atomic;

/// Errors from uploading a result file.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to store {destination}: {source}")]
    Store {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to upload {destination}: {source}")]
    Ftp {
        destination: String,
        #[source]
        source: suppaftp::FtpError,
    },

    #[error("upload task failed: {0}")]
    Join(String),
}

/// Accepts a completed result file under a destination name.
pub trait Uploader: Send + Sync {
    /// Uploads `local` as `file_name`; returns where it ended up.
    fn upload(
        &self,
        local: &Path,
        file_name: &str,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// Stores uploads under `<root>/<prefix>/<file_name>` on a local or mounted
/// filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
    prefix: String,
}

impl DirectoryUploader {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Final location of an uploaded file.
    pub fn destination(&self, file_name: &str) -> PathBuf {
        if self.prefix.is_empty() {
            self.root.join(file_name)
        } else {
            self.root.join(&self.prefix).join(file_name)
        }
    }
}

impl Uploader for DirectoryUploader {
    async fn upload(&self, local: &Path, file_name: &str) -> Result<String, UploadError> {
        let destination = self.destination(file_name);
        let local = local.to_path_buf();
        let target = destination.clone();

        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&local).map_err(|source| UploadError::Read {
                path: local.clone(),
                source,
            })?;
            write_bytes_atomic(&target, &bytes).map_err(|source| UploadError::Store {
                destination: target.display().to_string(),
                source,
            })
        })
        .await
        .map_err(|e| UploadError::Join(e.to_string()))??;

        let destination = destination.display().to_string();
        info!(destination = %destination, "Uploaded result");
        Ok(destination)
    }
}
