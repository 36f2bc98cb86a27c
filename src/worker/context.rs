//! Per-process worker identity and run flag.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use crate::queue::MessageAttributes;
use crate::types::{CrawlerProvenance, WorkerId};

/// Attribute naming the worker that enqueued a task.
pub const CREATOR_ID_ATTRIBUTE: &str = "creator_id";

/// Attribute carrying the enqueuing worker's start time (RFC 3339).
pub const CREATOR_STARTED_ATTRIBUTE: &str = "creator_started_timestamp";

/// Who this worker is and whether it should keep going.
///
/// Clones share the run flag, so a ctrl-c handler can hold one and stop the
/// dispatch loop at the next message boundary.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_id: WorkerId,
    started_at: DateTime<Utc>,
    stage: String,
    shutdown: CancellationToken,
}

impl WorkerContext {
    /// A fresh worker with a random id, started now.
    pub fn new(stage: impl Into<String>) -> Self {
        Self::with_identity(WorkerId::generate(), Utc::now(), stage)
    }

    pub fn with_identity(
        worker_id: WorkerId,
        started_at: DateTime<Utc>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            worker_id,
            started_at,
            stage: stage.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Clears the run flag.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once the run flag is cleared.
    pub fn stopped(&self) -> impl Future<Output = ()> + '_ {
        self.shutdown.cancelled()
    }

    pub fn provenance(&self) -> CrawlerProvenance {
        CrawlerProvenance {
            worker_id: self.worker_id.clone(),
            started_at: self.started_at,
            stage: self.stage.clone(),
        }
    }

    /// Attributes tagged onto every task this worker enqueues.
    pub fn provenance_attributes(&self) -> MessageAttributes {
        MessageAttributes::from([
            (
                CREATOR_ID_ATTRIBUTE.to_string(),
                self.worker_id.to_string(),
            ),
            (
                CREATOR_STARTED_ATTRIBUTE.to_string(),
                self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_shared_between_clones() {
        let ctx = WorkerContext::new("test");
        let handle = ctx.clone();
        assert!(ctx.is_running());

        handle.stop();

        assert!(!ctx.is_running());
    }

    #[test]
    fn provenance_attributes_identify_the_worker() {
        let started = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ctx = WorkerContext::with_identity(WorkerId("ab".repeat(16)), started, "prod");

        let attrs = ctx.provenance_attributes();

        assert_eq!(attrs[CREATOR_ID_ATTRIBUTE], "ab".repeat(16));
        assert_eq!(attrs[CREATOR_STARTED_ATTRIBUTE], "2023-11-14T22:13:20Z");
        assert_eq!(ctx.provenance().stage, "prod");
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let ctx = WorkerContext::new("test");
        ctx.stop();
        ctx.stopped().await;
    }
}
