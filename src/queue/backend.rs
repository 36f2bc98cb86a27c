//! The seam between the queue client and a concrete queue service.

use std::future::Future;
use std::time::Duration;

use super::error::QueueError;
use super::message::MessageAttributes;

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: u32,
    /// How long to long-poll for a message.
    pub wait_time: Duration,
    /// How long a delivered message stays hidden from other consumers.
    pub visibility_timeout: Duration,
}

/// A message as delivered by the backend, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: Option<String>,
    /// Handle used to delete this delivery.
    pub receipt_handle: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

/// What the backend reports after accepting a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    /// Hex MD5 of the body as the backend received it.
    pub md5_of_body: Option<String>,
}

/// A durable at-least-once queue.
pub trait QueueBackend: Send + Sync {
    /// Receive up to `request.max_messages` messages, waiting at most
    /// `request.wait_time` for the first one. An empty vector means the
    /// window elapsed.
    fn receive(
        &self,
        request: ReceiveRequest,
    ) -> impl Future<Output = Result<Vec<RawMessage>, QueueError>> + Send;

    /// Enqueue a body with zero delay.
    fn send(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> impl Future<Output = Result<SendReceipt, QueueError>> + Send;

    /// Acknowledge a delivery.
    fn delete(&self, receipt_handle: &str) -> impl Future<Output = Result<(), QueueError>> + Send;
}
