//! A cloned repository that deletes itself.
//!
//! The checkout directory is removed when the guard is dropped, on every exit
//! path of the task that owns it.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::walker::{GitCommitSource, WalkResult};
use super::{GitResult, clone_repository};

/// A local clone at a fixed scratch path.
#[derive(Debug)]
pub struct Checkout {
    path: PathBuf,
}

impl Checkout {
    /// Clones `url` into `path`, first removing anything a previous task left there.
    ///
    /// If the clone fails, the partially written directory is removed before
    /// the error is returned.
    pub fn clone_into(url: &str, path: impl Into<PathBuf>) -> GitResult<Self> {
        let path = path.into();
        remove_dir_if_exists(&path)?;

        info!(url, path = %path.display(), "Cloning repository");
        // Construct the guard first so a failed clone is cleaned up too
        let checkout = Checkout { path };
        clone_repository(url, &checkout.path)?;
        Ok(checkout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walks the history from HEAD, then removes the checkout.
    ///
    /// Blocking; the directory is gone when this returns, whatever the outcome.
    pub fn walk_history(self) -> GitResult<WalkResult> {
        GitCommitSource::new(&self.path).walk_from_head()
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        match remove_dir_if_exists(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed checkout"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove checkout"
            ),
        }
    }
}

fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
