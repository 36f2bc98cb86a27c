//! Phases of processing one repository task.
//!
//! ```text
//! Idle -> FetchingMeta -> Cloning -> WalkingHistory -> Persisting -> Uploading -> Done
//!              |              |             |
//!              +----------> Aborted <-------+
//! ```

use std::fmt;

use thiserror::Error;

/// Where a repository task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    Idle,
    FetchingMeta,
    Cloning,
    WalkingHistory,
    Persisting,
    Uploading,
    Done,
    /// The repository could not be crawled; the task is dropped.
    Aborted,
}

impl TaskPhase {
    /// Returns the name of this phase for logging/display.
    pub fn name(&self) -> &'static str {
        match self {
            TaskPhase::Idle => "idle",
            TaskPhase::FetchingMeta => "fetching_meta",
            TaskPhase::Cloning => "cloning",
            TaskPhase::WalkingHistory => "walking_history",
            TaskPhase::Persisting => "persisting",
            TaskPhase::Uploading => "uploading",
            TaskPhase::Done => "done",
            TaskPhase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Aborted)
    }

    /// Returns true if moving from `self` to `target` is allowed.
    pub fn can_transition_to(&self, target: TaskPhase) -> bool {
        matches!(
            (self, target),
            (TaskPhase::Idle, TaskPhase::FetchingMeta)
                | (TaskPhase::FetchingMeta, TaskPhase::Cloning)
                | (TaskPhase::FetchingMeta, TaskPhase::Aborted)
                | (TaskPhase::Cloning, TaskPhase::WalkingHistory)
                | (TaskPhase::Cloning, TaskPhase::Aborted)
                | (TaskPhase::WalkingHistory, TaskPhase::Persisting)
                | (TaskPhase::WalkingHistory, TaskPhase::Aborted)
                | (TaskPhase::Persisting, TaskPhase::Uploading)
                | (TaskPhase::Uploading, TaskPhase::Done)
        )
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task phase transition from {from} to {to}")]
pub struct TransitionError {
    pub from: TaskPhase,
    pub to: TaskPhase,
}

/// Tracks one task's phase and rejects invalid transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    current: TaskPhase,
    history: Vec<TaskPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: TaskPhase::Idle,
            history: vec![TaskPhase::Idle],
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> TaskPhase {
        self.current
    }

    /// Every phase entered so far, starting with `Idle`.
    pub fn history(&self) -> &[TaskPhase] {
        &self.history
    }

    pub fn advance(&mut self, to: TaskPhase) -> Result<(), TransitionError> {
        if !self.current.can_transition_to(to) {
            return Err(TransitionError {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.history.push(to);
        Ok(())
    }
}
