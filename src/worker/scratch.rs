//! Process-exclusive scratch directories.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::types::WorkerId;

const RESULTS_DIR: &str = "results";
const CHECKOUT_DIR: &str = "git_repo";

/// Scratch root created at start-up and removed when dropped.
///
/// ```text
/// <tmp>/raq_crawler_<worker id>_XXXX/
///     results/    finished result files awaiting upload
///     git_repo/   checkout of the repository being crawled
/// ```
#[derive(Debug)]
pub struct ScratchSpace {
    root: TempDir,
    results_dir: PathBuf,
}

impl ScratchSpace {
    /// Creates the scratch root under the system temp directory.
    pub fn create(worker_id: &WorkerId) -> io::Result<Self> {
        Self::create_in(std::env::temp_dir(), worker_id)
    }

    pub fn create_in(parent: impl AsRef<Path>, worker_id: &WorkerId) -> io::Result<Self> {
        let root = tempfile::Builder::new()
            .prefix(&format!("raq_crawler_{}_", worker_id))
            .tempdir_in(parent)?;
        let results_dir = root.path().join(RESULTS_DIR);
        std::fs::create_dir_all(&results_dir)?;
        debug!(root = %root.path().display(), "Created scratch space");
        Ok(Self { root, results_dir })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Where the current task's repository is cloned.
    pub fn checkout_path(&self) -> PathBuf {
        self.root.path().join(CHECKOUT_DIR)
    }
}
