//! Task payloads carried by queue messages.
//!
//! The wire format is a JSON object with a `task_type` discriminator and a
//! variant-specific payload object:
//!
//! ```text
//! {"task_type": "repo",   "repo_task":   {"id": 1, "full_name": "o/r", "api_url": "..."}}
//! {"task_type": "refill", "refill_task": {"since_id": 100}}
//! {"task_type": "kill-15"}
//! ```
//!
//! Decoding happens exactly once, at the queue boundary. Anything that does not
//! match one of the known shapes becomes [`Task::Unknown`] with the reason, so
//! the dispatcher never branches on raw strings.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use super::ids::RepoId;

/// Discriminator field name.
pub const TASK_TYPE_FIELD: &str = "task_type";

const REPO_TYPE: &str = "repo";
const REFILL_TYPE: &str = "refill";
const KILL_TYPE: &str = "kill-15";
const KILL_TYPE_ALIAS: &str = "kill";

/// Crawl one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTask {
    pub id: RepoId,
    pub full_name: String,
    /// Metadata endpoint for the repository.
    pub api_url: String,
}

/// List repositories created after `since_id` and enqueue them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillTask {
    pub since_id: u64,
}

/// Why a message body could not be decoded into a known task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTask {
    /// The body is not a JSON document.
    NotJson(String),
    /// The body has no `task_type` field.
    MissingType,
    /// The `task_type` is not one we know.
    UnrecognizedType(String),
    /// The type is known but its payload is malformed.
    MalformedPayload { task_type: String, reason: String },
}

impl fmt::Display for InvalidTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidTask::NotJson(e) => write!(f, "body is not JSON: {}", e),
            InvalidTask::MissingType => write!(f, "missing {}", TASK_TYPE_FIELD),
            InvalidTask::UnrecognizedType(t) => write!(f, "unrecognized task_type {:?}", t),
            InvalidTask::MalformedPayload { task_type, reason } => {
                write!(f, "malformed {} payload: {}", task_type, reason)
            }
        }
    }
}

/// A decoded task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Repo(RepoTask),
    Refill(RefillTask),
    /// Poison pill: the receiving worker stops and passes the pill on.
    Kill,
    /// Anything the decoder could not make sense of.
    Unknown(InvalidTask),
}

impl Task {
    /// Decodes a parsed message body.
    pub fn decode(body: &Value) -> Task {
        let Some(tag) = body.get(TASK_TYPE_FIELD) else {
            return Task::Unknown(InvalidTask::MissingType);
        };
        let Some(tag) = tag.as_str() else {
            return Task::Unknown(InvalidTask::UnrecognizedType(tag.to_string()));
        };

        match tag {
            REPO_TYPE => {
                decode_payload(body, tag, "repo_task").map_or_else(Task::Unknown, Task::Repo)
            }
            REFILL_TYPE => {
                decode_payload(body, tag, "refill_task").map_or_else(Task::Unknown, Task::Refill)
            }
            KILL_TYPE | KILL_TYPE_ALIAS => Task::Kill,
            other => Task::Unknown(InvalidTask::UnrecognizedType(other.to_string())),
        }
    }

    /// Decodes a raw message body.
    pub fn decode_str(raw: &str) -> (Value, Task) {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                let task = Task::decode(&value);
                (value, task)
            }
            Err(e) => (
                Value::String(raw.to_string()),
                Task::Unknown(InvalidTask::NotJson(e.to_string())),
            ),
        }
    }

    /// Encodes the task in its wire format.
    ///
    /// Returns `None` for [`Task::Unknown`], which has no wire representation.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Task::Repo(repo) => Some(json!({ TASK_TYPE_FIELD: REPO_TYPE, "repo_task": repo })),
            Task::Refill(refill) => {
                Some(json!({ TASK_TYPE_FIELD: REFILL_TYPE, "refill_task": refill }))
            }
            Task::Kill => Some(json!({ TASK_TYPE_FIELD: KILL_TYPE })),
            Task::Unknown(_) => None,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::Repo(_) => REPO_TYPE,
            Task::Refill(_) => REFILL_TYPE,
            Task::Kill => KILL_TYPE,
            Task::Unknown(_) => "unknown",
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    body: &Value,
    task_type: &str,
    field: &str,
) -> Result<T, InvalidTask> {
    let malformed = |reason: String| InvalidTask::MalformedPayload {
        task_type: task_type.to_string(),
        reason,
    };
    let payload = body
        .get(field)
        .ok_or_else(|| malformed(format!("missing {}", field)))?;
    serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))
}
