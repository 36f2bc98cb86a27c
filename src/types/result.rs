//! Crawl results: commits and the per-repository aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ids::{RepoId, Sha, WorkerId};

/// One commit of a repository's history.
///
/// Identity is the SHA; a walk never produces two records for the same SHA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: Sha,
    /// Parents in the order git reports them (first parent first).
    pub parent_shas: Vec<Sha>,
    pub message: String,
}

/// Which worker produced a result, and when it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerProvenance {
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub stage: String,
}

/// Everything collected for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoResult {
    /// Repository metadata as returned by the API.
    pub meta: Value,
    /// Language breakdown as returned by the API.
    pub languages: Value,
    pub commits: BTreeMap<Sha, CommitRecord>,
    pub crawler: CrawlerProvenance,
}

impl RepoResult {
    /// The repository id from the metadata, if present.
    pub fn repo_id(&self) -> Option<RepoId> {
        self.meta.get("id").and_then(Value::as_u64).map(RepoId)
    }

    /// File name the result is persisted and uploaded under.
    pub fn file_name(&self, fallback: RepoId) -> String {
        format!("{}.json", self.repo_id().unwrap_or(fallback))
    }
}
