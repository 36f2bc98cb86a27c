//! Decoded queue messages.

use std::collections::BTreeMap;

use serde_json::Value;

use super::backend::RawMessage;
use crate::types::Task;

/// String-typed message attributes.
pub type MessageAttributes = BTreeMap<String, String>;

/// A delivered message with its body decoded.
///
/// Owned by the consumer until passed to
/// [`MessageQueueClient::delete`](super::MessageQueueClient::delete). Dropping
/// it without deleting leaves the message to be redelivered.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message_id: Option<String>,
    pub receipt_handle: String,
    /// The parsed body; a JSON string holding the raw text if it was not JSON.
    pub body: Value,
    pub raw_body: String,
    pub task: Task,
    pub attributes: MessageAttributes,
}

impl QueuedMessage {
    pub fn from_raw(raw: RawMessage) -> Self {
        let (body, task) = Task::decode_str(&raw.body);
        Self {
            message_id: raw.message_id,
            receipt_handle: raw.receipt_handle,
            body,
            raw_body: raw.body,
            task,
            attributes: raw.attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Message id if known, otherwise the receipt handle, for log fields.
    pub fn log_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.receipt_handle)
    }
}
