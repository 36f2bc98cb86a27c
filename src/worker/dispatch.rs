//! Task dispatch: pop a message, route it by task type, acknowledge it.
//!
//! The loop is strictly sequential (pop -> dispatch -> delete), so the single
//! checkout directory in the scratch space is never shared between tasks.
//!
//! # Acknowledgement rules
//!
//! - A message is deleted only after every side effect of its handler
//!   completed: the result is uploaded, the follow-up tasks are written.
//! - A repository that is gone (permanent API error) or cannot be cloned
//!   ends the task as `Aborted`; the message is deleted so a bad repository
//!   never blocks the queue.
//! - Any other handler error leaves the message undeleted. It reappears
//!   after the visibility timeout and is retried by some worker.
//! - Contract violations (queue or API) stop the worker.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::context::WorkerContext;
use super::scratch::ScratchSpace;
use crate::config::{ConfigError, CrawlerConfig, DEFAULT_API_BASE, UnknownTaskPolicy};
use crate::git::Checkout;
use crate::github::{ApiClient, ApiError};
use crate::queue::{MessageAttributes, MessageQueueClient, QueueBackend, QueueError, QueuedMessage};
use crate::results::{StoreError, UploadError, Uploader, persist_result};
use crate::types::{
    InvalidTask, PhaseTracker, RefillTask, RepoId, RepoResult, RepoTask, Task, TaskPhase,
    TransitionError,
};

/// Errors from handling one message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to store result: {0}")]
    Store(#[from] StoreError),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    #[error("cannot encode {0} task")]
    Unencodable(&'static str),

    #[error("background task failed: {0}")]
    Join(String),
}

impl DispatchError {
    /// True if the worker must stop rather than move on to the next message.
    pub fn is_fatal(&self) -> bool {
        match self {
            DispatchError::Api(e) => e.is_contract_violation(),
            DispatchError::Queue(e) => e.is_contract_violation(),
            DispatchError::Transition(_) => true,
            _ => false,
        }
    }
}

/// How one message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The repository was crawled and its result uploaded.
    Crawled {
        repo: RepoId,
        commits: usize,
        destination: String,
    },
    /// The repository could not be crawled; the task was dropped.
    Aborted { repo: RepoId, reason: String },
    /// Repository tasks and a successor refill were enqueued.
    Refilled { enqueued: usize, next_since_id: u64 },
    /// The worker stopped and passed the kill task on.
    Killed,
    /// An undecodable task was dropped.
    Skipped { reason: String },
    /// An undecodable task was dropped and the worker stopped.
    Halted { reason: String },
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// API root used to build listing and metadata URLs.
    pub api_base: String,
    pub unknown_task_policy: UnknownTaskPolicy,
    /// Pause after a failed message before polling again.
    pub error_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            unknown_task_policy: UnknownTaskPolicy::default(),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: config.api_base().to_string(),
            unknown_task_policy: config.unknown_task_policy()?,
            ..Self::default()
        })
    }
}

/// URL of the repository listing page after `since_id`.
pub fn refill_url(api_base: &str, since_id: u64) -> String {
    format!("{}/repositories?since={}", api_base, since_id)
}

/// Metadata URL of a repository.
pub fn repo_api_url(api_base: &str, full_name: &str) -> String {
    format!("{}/repos/{}", api_base, full_name)
}

/// One entry of the repository listing.
#[derive(Debug, Deserialize)]
struct ListedRepo {
    id: u64,
    full_name: String,
}

/// Routes queue messages to their handlers.
pub struct Dispatcher<A, B, U> {
    api: A,
    queue: MessageQueueClient<B>,
    uploader: U,
    context: WorkerContext,
    scratch: ScratchSpace,
    config: DispatchConfig,
}

impl<A, B, U> Dispatcher<A, B, U>
where
    A: ApiClient,
    B: QueueBackend,
    U: Uploader,
{
    pub fn new(
        api: A,
        queue: MessageQueueClient<B>,
        uploader: U,
        context: WorkerContext,
        scratch: ScratchSpace,
        config: DispatchConfig,
    ) -> Self {
        Self {
            api,
            queue,
            uploader,
            context,
            scratch,
            config,
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn queue(&self) -> &MessageQueueClient<B> {
        &self.queue
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    /// Processes messages until the run flag is cleared or a fatal error occurs.
    #[instrument(skip(self), fields(worker_id = %self.context.worker_id()))]
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        info!(stage = self.context.stage(), "Worker loop started");

        while self.context.is_running() {
            match self.run_once().await {
                Ok(Some(outcome)) => debug!(?outcome, "Message handled"),
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error, stopping worker");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Message failed, leaving it for redelivery");
                    tokio::select! {
                        _ = self.context.stopped() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!("Worker loop stopped");
        Ok(())
    }

    /// Pops and handles at most one message.
    ///
    /// Returns `Ok(None)` when the queue was idle for a whole wait window or
    /// the run flag was cleared while waiting.
    pub async fn run_once(&mut self) -> Result<Option<TaskOutcome>, DispatchError> {
        let popped = tokio::select! {
            _ = self.context.stopped() => return Ok(None),
            popped = self.queue.pop_next() => popped,
        };

        let message = match popped {
            Ok(message) => message,
            Err(e) if e.is_idle() => {
                debug!("Queue idle");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            rate_remaining = ?self.api.rate(),
            rate_reset = ?self.api.rate_reset_time(),
            "Popped message"
        );
        self.dispatch(message).await.map(Some)
    }

    /// Handles one message and acknowledges it according to the outcome.
    #[instrument(
        skip_all,
        fields(message_id = message.log_id(), task_type = message.task.kind())
    )]
    pub async fn dispatch(&mut self, message: QueuedMessage) -> Result<TaskOutcome, DispatchError> {
        match message.task.clone() {
            Task::Repo(task) => {
                let outcome = self.handle_repo(&task).await?;
                self.queue.delete(message).await?;
                Ok(outcome)
            }
            Task::Refill(task) => {
                let outcome = self.handle_refill(task).await?;
                self.queue.delete(message).await?;
                Ok(outcome)
            }
            Task::Kill => self.handle_kill(message).await,
            Task::Unknown(reason) => self.handle_unknown(message, reason).await,
        }
    }

    async fn handle_repo(&mut self, task: &RepoTask) -> Result<TaskOutcome, DispatchError> {
        let mut phase = PhaseTracker::new();
        info!(repo_id = %task.id, full_name = %task.full_name, "Crawling repository");

        phase.advance(TaskPhase::FetchingMeta)?;
        let meta = match self.fetch_for_repo(&task.api_url).await? {
            Ok(meta) => meta,
            Err(e) => return abort(&mut phase, task, e.to_string()),
        };
        let languages = match meta.get("languages_url").and_then(Value::as_str) {
            Some(url) => match self.fetch_for_repo(url).await? {
                Ok(languages) => languages,
                Err(e) => return abort(&mut phase, task, e.to_string()),
            },
            None => {
                warn!(repo_id = %task.id, "Metadata has no languages_url");
                Value::Object(Default::default())
            }
        };

        phase.advance(TaskPhase::Cloning)?;
        let Some(clone_url) = meta.get("clone_url").and_then(Value::as_str) else {
            return abort(&mut phase, task, "metadata has no clone_url".to_string());
        };
        let clone_url = clone_url.to_string();
        let checkout_path = self.scratch.checkout_path();
        let checkout =
            match run_blocking(move || Checkout::clone_into(&clone_url, checkout_path)).await? {
                Ok(checkout) => checkout,
                Err(e) => return abort(&mut phase, task, e.to_string()),
            };

        phase.advance(TaskPhase::WalkingHistory)?;
        let walk = match run_blocking(move || checkout.walk_history()).await? {
            Ok(walk) => walk,
            Err(e) => return abort(&mut phase, task, e.to_string()),
        };
        if !walk.failed.is_empty() {
            warn!(
                repo_id = %task.id,
                failed = walk.failed.len(),
                "Some commits could not be read"
            );
        }

        phase.advance(TaskPhase::Persisting)?;
        let result = RepoResult {
            meta,
            languages,
            commits: walk.commits,
            crawler: self.context.provenance(),
        };
        let commits = result.commits.len();
        let file_name = result.file_name(task.id);
        let results_dir = self.scratch.results_dir().to_path_buf();
        let fallback = task.id;
        let local: PathBuf =
            run_blocking(move || persist_result(&results_dir, &result, fallback)).await??;

        phase.advance(TaskPhase::Uploading)?;
        let destination = self.uploader.upload(&local, &file_name).await?;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            warn!(path = %local.display(), error = %e, "Failed to remove uploaded result");
        }

        phase.advance(TaskPhase::Done)?;
        info!(repo_id = %task.id, commits, destination = %destination, "Repository crawled");
        Ok(TaskOutcome::Crawled {
            repo: task.id,
            commits,
            destination,
        })
    }

    /// GETs `url` on behalf of a repository task.
    ///
    /// The inner error is a permanent failure (e.g. a repository deleted
    /// after it was listed) that ends the task. Transient failures and
    /// contract violations come back as the outer error.
    async fn fetch_for_repo(
        &mut self,
        url: &str,
    ) -> Result<Result<Value, ApiError>, DispatchError> {
        match self.api.get(url).await {
            Ok(response) => Ok(Ok(response.body)),
            Err(e) if e.kind.is_retriable() || e.is_contract_violation() => Err(e.into()),
            Err(e) => Ok(Err(e)),
        }
    }

    async fn handle_refill(&mut self, task: RefillTask) -> Result<TaskOutcome, DispatchError> {
        let url = refill_url(&self.config.api_base, task.since_id);
        let page = self.api.get(&url).await?.body;
        let Some(entries) = page.as_array() else {
            return Err(DispatchError::UnexpectedResponse {
                url,
                reason: "expected a JSON array of repositories".to_string(),
            });
        };

        let attributes = self.context.provenance_attributes();
        let mut next_since_id = task.since_id;
        let mut enqueued = 0;
        for entry in entries {
            let listed: ListedRepo = match serde_json::from_value(entry.clone()) {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping malformed repository entry");
                    continue;
                }
            };
            let repo_task = Task::Repo(RepoTask {
                id: RepoId(listed.id),
                api_url: repo_api_url(&self.config.api_base, &listed.full_name),
                full_name: listed.full_name,
            });
            self.write_task(&repo_task, attributes.clone()).await?;
            next_since_id = next_since_id.max(listed.id);
            enqueued += 1;
        }

        self.write_task(
            &Task::Refill(RefillTask {
                since_id: next_since_id,
            }),
            attributes,
        )
        .await?;

        info!(
            since_id = task.since_id,
            enqueued, next_since_id, "Refilled queue"
        );
        Ok(TaskOutcome::Refilled {
            enqueued,
            next_since_id,
        })
    }

    async fn handle_kill(&mut self, message: QueuedMessage) -> Result<TaskOutcome, DispatchError> {
        info!("Kill task received, stopping after this message");
        self.context.stop();
        self.write_task(&Task::Kill, self.context.provenance_attributes())
            .await?;
        self.queue.delete(message).await?;
        Ok(TaskOutcome::Killed)
    }

    async fn handle_unknown(
        &mut self,
        message: QueuedMessage,
        reason: InvalidTask,
    ) -> Result<TaskOutcome, DispatchError> {
        let reason = reason.to_string();
        let outcome = match self.config.unknown_task_policy {
            UnknownTaskPolicy::Skip => {
                error!(reason = %reason, body = %message.raw_body, "Dropping undecodable task");
                TaskOutcome::Skipped { reason }
            }
            UnknownTaskPolicy::Halt => {
                error!(reason = %reason, body = %message.raw_body, "Undecodable task, stopping worker");
                self.context.stop();
                TaskOutcome::Halted { reason }
            }
        };
        self.queue.delete(message).await?;
        Ok(outcome)
    }

    async fn write_task(
        &self,
        task: &Task,
        attributes: MessageAttributes,
    ) -> Result<(), DispatchError> {
        let body = task
            .to_json()
            .ok_or(DispatchError::Unencodable(task.kind()))?;
        self.queue.write(&body, attributes).await?;
        Ok(())
    }
}

fn abort(
    phase: &mut PhaseTracker,
    task: &RepoTask,
    reason: String,
) -> Result<TaskOutcome, DispatchError> {
    error!(
        repo_id = %task.id,
        full_name = %task.full_name,
        phase = %phase.current(),
        reason = %reason,
        "Aborting repository"
    );
    phase.advance(TaskPhase::Aborted)?;
    Ok(TaskOutcome::Aborted {
        repo: task.id,
        reason,
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DispatchError::Join(e.to_string()))
}
