//! Commit graph traversal.
//!
//! The walker performs a FIFO worklist traversal from a single commit. Every
//! reachable commit is queried exactly once no matter how many descendants
//! reference it, so merge-heavy histories cost one query pair per commit.
//!
//! A failure on one commit does not stop the walk: the commit is logged,
//! marked visited, recorded in [`WalkResult::failed`], and the traversal
//! continues with whatever is still on the worklist.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::{GitError, GitResult, commit_message, head_sha, parent_shas};
use crate::types::{CommitRecord, Sha};

/// Per-commit queries the walker needs from a repository.
pub trait CommitSource {
    type Error: Display;

    /// Parent SHAs of `sha`, first parent first.
    fn parents(&self, sha: &Sha) -> Result<Vec<Sha>, Self::Error>;

    /// The commit message of `sha`.
    fn message(&self, sha: &Sha) -> Result<String, Self::Error>;
}

/// A [`CommitSource`] backed by a local git checkout.
#[derive(Debug, Clone)]
pub struct GitCommitSource {
    workdir: PathBuf,
}

impl GitCommitSource {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Walks the checkout's history from HEAD.
    ///
    /// A repository without commits yields an empty result.
    pub fn walk_from_head(&self) -> GitResult<WalkResult> {
        match head_sha(&self.workdir)? {
            Some(head) => Ok(CommitGraphWalker::new(self).walk(&head)),
            None => {
                debug!(workdir = %self.workdir.display(), "Repository has no commits");
                Ok(WalkResult::default())
            }
        }
    }
}

impl CommitSource for GitCommitSource {
    type Error = GitError;

    fn parents(&self, sha: &Sha) -> Result<Vec<Sha>, GitError> {
        parent_shas(&self.workdir, sha)
    }

    fn message(&self, sha: &Sha) -> Result<String, GitError> {
        commit_message(&self.workdir, sha)
    }
}

/// What a walk produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkResult {
    /// One record per commit whose data was extracted completely.
    pub commits: BTreeMap<Sha, CommitRecord>,

    /// Commits that were visited but whose parents or message could not be read.
    pub failed: BTreeSet<Sha>,
}

impl WalkResult {
    /// Number of distinct commits visited, including failed ones.
    pub fn visited(&self) -> usize {
        self.commits.len() + self.failed.len()
    }
}

/// Worklist traversal over a [`CommitSource`].
pub struct CommitGraphWalker<'a, S> {
    source: &'a S,
}

impl<'a, S: CommitSource> CommitGraphWalker<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Walks every commit reachable from `initial`.
    pub fn walk(&self, initial: &Sha) -> WalkResult {
        let mut result = WalkResult::default();
        let mut visited: HashSet<Sha> = HashSet::new();
        let mut worklist: VecDeque<Sha> = VecDeque::from([initial.clone()]);

        while let Some(sha) = worklist.pop_front() {
            // Empty SHA stands for "no parent"
            if sha.is_empty() || visited.contains(&sha) {
                continue;
            }
            trace!(sha = %sha, "Visiting commit");

            let parents = match self.source.parents(&sha) {
                Ok(parents) => {
                    let parents: Vec<Sha> = parents.into_iter().filter(|p| !p.is_empty()).collect();
                    worklist.extend(parents.iter().cloned());
                    Some(parents)
                }
                Err(e) => {
                    warn!(sha = %sha, error = %e, "Failed to read commit parents");
                    None
                }
            };

            let message = match self.source.message(&sha) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(sha = %sha, error = %e, "Failed to read commit message");
                    None
                }
            };

            match (parents, message) {
                (Some(parent_shas), Some(message)) => {
                    result.commits.insert(
                        sha.clone(),
                        CommitRecord {
                            sha: sha.clone(),
                            parent_shas,
                            message,
                        },
                    );
                }
                _ => {
                    result.failed.insert(sha.clone());
                }
            }
            visited.insert(sha);
        }

        debug!(
            commits = result.commits.len(),
            failed = result.failed.len(),
            "Commit walk finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_repo::TestRepo;
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory commit graph that counts queries per SHA.
    struct FakeSource {
        graph: HashMap<Sha, (Vec<Sha>, String)>,
        broken: HashSet<Sha>,
        queries: RefCell<HashMap<Sha, usize>>,
    }

    impl FakeSource {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            let graph = edges
                .iter()
                .map(|(sha, parents)| {
                    (
                        Sha::new(*sha),
                        (
                            parents.iter().map(|p| Sha::new(*p)).collect(),
                            format!("message {}", sha),
                        ),
                    )
                })
                .collect();
            Self {
                graph,
                broken: HashSet::new(),
                queries: RefCell::new(HashMap::new()),
            }
        }
    }

    impl CommitSource for FakeSource {
        type Error = String;

        fn parents(&self, sha: &Sha) -> Result<Vec<Sha>, String> {
            *self.queries.borrow_mut().entry(sha.clone()).or_default() += 1;
            if self.broken.contains(sha) {
                return Err(format!("cannot read {}", sha));
            }
            self.graph
                .get(sha)
                .map(|(p, _)| p.clone())
                .ok_or_else(|| format!("unknown {}", sha))
        }

        fn message(&self, sha: &Sha) -> Result<String, String> {
            self.graph
                .get(sha)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| format!("unknown {}", sha))
        }
    }

    #[test]
    fn diamond_visits_shared_ancestor_once() {
        let source = FakeSource::new(&[
            ("d", &["b", "c"]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("a", &[]),
        ]);
        let result = CommitGraphWalker::new(&source).walk(&Sha::new("d"));

        assert_eq!(result.commits.len(), 4);
        assert!(result.failed.is_empty());
        assert!(source.queries.borrow().values().all(|&n| n == 1));
        assert_eq!(
            result.commits[&Sha::new("d")].parent_shas,
            vec![Sha::new("b"), Sha::new("c")]
        );
    }

    #[test]
    fn root_commit_terminates_branch() {
        let source = FakeSource::new(&[("a", &[])]);
        let result = CommitGraphWalker::new(&source).walk(&Sha::new("a"));

        assert_eq!(result.commits.len(), 1);
        assert!(result.commits[&Sha::new("a")].parent_shas.is_empty());
        assert!(!source.queries.borrow().contains_key(&Sha::new("")));
    }

    #[test]
    fn empty_initial_sha_yields_nothing() {
        let source = FakeSource::new(&[]);
        let result = CommitGraphWalker::new(&source).walk(&Sha::new(""));
        assert_eq!(result, WalkResult::default());
    }

    #[test]
    fn empty_parent_entries_are_not_followed() {
        let source = FakeSource::new(&[("b", &["", "a"]), ("a", &[])]);
        let result = CommitGraphWalker::new(&source).walk(&Sha::new("b"));

        assert_eq!(result.commits.len(), 2);
        assert_eq!(result.commits[&Sha::new("b")].parent_shas, vec![Sha::new("a")]);
    }

    #[test]
    fn failing_commit_does_not_abort_walk() {
        // b is unreadable; a is still reached through x
        let mut source = FakeSource::new(&[
            ("c", &["b", "x"]),
            ("b", &["a"]),
            ("x", &["a"]),
            ("a", &[]),
        ]);
        source.broken.insert(Sha::new("b"));

        let result = CommitGraphWalker::new(&source).walk(&Sha::new("c"));

        assert_eq!(result.failed, BTreeSet::from([Sha::new("b")]));
        let walked: Vec<&str> = result.commits.keys().map(|s| s.as_str()).collect();
        assert_eq!(walked, vec!["a", "c", "x"]);
        assert_eq!(result.visited(), 4);
        assert_eq!(source.queries.borrow()[&Sha::new("b")], 1);
    }

    #[test]
    fn git_source_walks_real_history() {
        let repo = TestRepo::new();
        let [root, left, right, merge] = repo.diamond();

        let result = GitCommitSource::new(repo.path()).walk_from_head().unwrap();

        assert_eq!(result.commits.len(), 4);
        assert_eq!(result.commits[&merge].parent_shas, vec![left.clone(), right]);
        assert_eq!(result.commits[&merge].message, "merge side");
        assert!(result.commits[&root].parent_shas.is_empty());
        assert_eq!(result.commits[&left].message, "left");
    }

    #[test]
    fn git_source_on_empty_repo_is_empty() {
        let repo = TestRepo::new();
        let result = GitCommitSource::new(repo.path()).walk_from_head().unwrap();
        assert_eq!(result, WalkResult::default());
    }
}
