//! Local git operations for crawling a repository's history.
//!
//! This module shells out to the `git` binary:
//! - Cloning a remote repository into a scratch directory
//! - Resolving the checkout's head commit
//! - Querying one commit's parents and message
//! - Walking the whole commit graph (see [`walker`])
//!
//! Every operation takes its working directory explicitly; nothing here
//! changes the process's current directory.

pub mod checkout;
pub mod walker;


use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use checkout::Checkout;
pub use walker::{CommitGraphWalker, CommitSource, GitCommitSource, WalkResult};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Cloning the remote repository failed.
    #[error("failed to clone {url}: {stderr}")]
    CloneFailed { url: String, stderr: String },

    /// Git printed something that is not a SHA where one was expected.
    #[error("invalid SHA: {0:?}")]
    InvalidSha(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., hooks, aliases, pagers).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    // Disable system and user config for reproducible behavior
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");

    // Never block on a credential prompt for private repositories
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd.arg("--no-pager");
    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clone `url` into `target`.
///
/// `target` must not exist yet; its parent must.
pub fn clone_repository(url: &str, target: &Path) -> GitResult<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let target_str = target.to_string_lossy();
    let output = git_command(parent)
        .args(["clone", "--quiet", "--", url, target_str.as_ref()])
        .output()?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CloneFailed {
            url: url.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// The commit HEAD points at, or `None` for a repository without commits.
pub fn head_sha(workdir: &Path) -> GitResult<Option<Sha>> {
    let output = git_command(workdir)
        .args(["rev-parse", "--verify", "-q", "HEAD"])
        .output()?;

    // Exit 0 = resolved, exit 1 = unborn HEAD, other = error
    match output.status.code() {
        Some(0) => {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if is_hex_sha(&sha) {
                Ok(Some(Sha(sha)))
            } else {
                Err(GitError::InvalidSha(sha))
            }
        }
        Some(1) => Ok(None),
        _ => Err(GitError::CommandFailed {
            command: "git rev-parse --verify -q HEAD".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
    }
}

/// Parent SHAs of a commit, first parent first. Empty for a root commit.
pub fn parent_shas(workdir: &Path, commit: &Sha) -> GitResult<Vec<Sha>> {
    let output = run_git_stdout(workdir, &["show", "-s", "--format=%P", commit.as_str()])?;
    output
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if is_hex_sha(s) {
                Ok(Sha::new(s))
            } else {
                Err(GitError::InvalidSha(s.to_string()))
            }
        })
        .collect()
}

/// The full commit message (subject and body) without trailing newlines.
pub fn commit_message(workdir: &Path, commit: &Sha) -> GitResult<String> {
    let output = run_git_sync(workdir, &["show", "-s", "--format=%B", commit.as_str()])?;
    let message = String::from_utf8_lossy(&output.stdout);
    Ok(message.trim_end_matches('\n').to_string())
}

fn is_hex_sha(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}
