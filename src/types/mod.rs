//! Core domain types for the crawler.
//!
//! Identifiers, the task variants that travel through the queue, the phases
//! of a repository crawl, and the result records it produces.

pub mod ids;
pub mod phase;
pub mod result;
pub mod task;

pub use ids::{RepoId, Sha, WorkerId};
pub use phase::{PhaseTracker, TaskPhase, TransitionError};
pub use result::{CommitRecord, CrawlerProvenance, RepoResult};
pub use task::{InvalidTask, RefillTask, RepoTask, Task};
