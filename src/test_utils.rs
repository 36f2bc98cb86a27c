//! Shared test utilities and arbitrary generators for property-based testing.

use crate::types::{RepoId, RepoTask, Sha};
use proptest::prelude::*;

pub fn arb_repo_id() -> impl Strategy<Value = RepoId> {
    (1u64..10_000_000).prop_map(RepoId)
}

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(Sha)
}

pub fn arb_full_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}/[a-z][a-z0-9_.-]{0,16}"
}

pub fn arb_repo_task() -> impl Strategy<Value = RepoTask> {
    (arb_repo_id(), arb_full_name()).prop_map(|(id, full_name)| RepoTask {
        api_url: format!("https://api.github.com/repos/{}", full_name),
        id,
        full_name,
    })
}

/// A commit DAG as adjacency lists: node `i` has up to two distinct parents,
/// all with smaller indices. The last node is the head.
pub fn arb_commit_dag(max_nodes: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_nodes).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::<usize>::new()).boxed()
                } else {
                    prop::collection::btree_set(0..i, 0..=i.min(2))
                        .prop_map(|parents| parents.into_iter().rev().collect::<Vec<usize>>())
                        .boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

/// A page of repository ids as the listing endpoint would return it.
pub fn arb_id_page() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(1u64..1_000_000, 0..30)
        .prop_map(|ids| ids.into_iter().collect())
        .prop_shuffle()
}
