//! RAQ crawler - a queue-driven worker that crawls GitHub repositories.
//!
//! A worker pops tasks from a durable queue and handles them one at a time:
//!
//! - `repo` tasks fetch a repository's metadata and languages, clone it, walk
//!   its full commit graph and upload the aggregated result
//! - `refill` tasks list the next page of repositories and enqueue a `repo`
//!   task for each, plus a successor `refill`
//! - `kill` tasks stop the worker and are passed on to the next one

pub mod config;
pub mod git;
pub mod github;
pub mod queue;
pub mod results;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
