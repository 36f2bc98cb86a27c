//! The crawl worker.
//!
//! One worker per process, processing one message at a time:
//!
//! - [`context`]: worker identity, start time and the run flag
//! - [`scratch`]: the process-exclusive scratch directory
//! - [`dispatch`]: the pop/dispatch/acknowledge loop and the task handlers

pub mod context;
pub mod dispatch;
pub mod scratch;


pub use context::{CREATOR_ID_ATTRIBUTE, CREATOR_STARTED_ATTRIBUTE, WorkerContext};
pub use dispatch::{
    DispatchConfig, DispatchError, Dispatcher, TaskOutcome, refill_url, repo_api_url,
};
pub use scratch::ScratchSpace;
