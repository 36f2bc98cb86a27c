//! Queue error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from the message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The long-poll window elapsed without a message. Not a failure.
    #[error("no messages available after waiting {waited:?}")]
    NoMessages { waited: Duration },

    /// The backend returned more messages than were requested.
    #[error("queue returned {received} messages but at most {requested} were requested")]
    TooManyMessages { requested: u32, received: usize },

    /// The backend's send receipt did not confirm the write.
    #[error("write not acknowledged: {reason}")]
    WriteNotAcknowledged { reason: String },

    /// A received message carried no receipt handle, so it could never be deleted.
    #[error("message {message_id:?} has no receipt handle")]
    MissingReceiptHandle { message_id: Option<String> },

    /// The receipt handle does not name an in-flight message.
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),

    /// Serializing a message body failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend could not be reached or rejected the request.
    #[error("queue transport error: {0}")]
    Transport(String),
}

impl QueueError {
    /// True for the idle condition.
    pub fn is_idle(&self) -> bool {
        matches!(self, QueueError::NoMessages { .. })
    }

    /// True if the backend broke the queue protocol.
    ///
    /// These are surfaced immediately and never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            QueueError::TooManyMessages { .. }
                | QueueError::WriteNotAcknowledged { .. }
                | QueueError::MissingReceiptHandle { .. }
        )
    }
}
