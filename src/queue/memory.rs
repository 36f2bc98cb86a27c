//! A process-local queue with the same delivery semantics as the real one.
//!
//! Messages are delivered in send order. A received message becomes invisible
//! until its visibility timeout passes; every delivery gets a fresh receipt
//! handle, and only the latest handle can delete the message. Receives
//! long-poll until a message becomes available or the wait window ends.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::backend::{QueueBackend, RawMessage, ReceiveRequest, SendReceipt};
use super::client::md5_hex;
use super::error::QueueError;
use super::message::MessageAttributes;

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: MessageAttributes,
    /// Receipt handle of the current delivery, if any.
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    messages: Mutex<VecDeque<StoredMessage>>,
    arrivals: Notify,
}

/// In-memory [`QueueBackend`]. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages that a receive would deliver right now.
    pub async fn visible_len(&self) -> usize {
        let now = Instant::now();
        let messages = self.inner.messages.lock().await;
        messages.iter().filter(|m| m.is_visible(now)).count()
    }

    /// Messages delivered but neither deleted nor timed out.
    pub async fn in_flight_len(&self) -> usize {
        let now = Instant::now();
        let messages = self.inner.messages.lock().await;
        messages.iter().filter(|m| !m.is_visible(now)).count()
    }

    /// Bodies of all stored messages in send order, regardless of visibility.
    pub async fn bodies(&self) -> Vec<String> {
        let messages = self.inner.messages.lock().await;
        messages.iter().map(|m| m.body.clone()).collect()
    }

    /// Takes up to `max` visible messages and hides them, or reports when the
    /// next hidden message reappears.
    async fn take_visible(
        &self,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, Option<Instant>> {
        let now = Instant::now();
        let mut messages = self.inner.messages.lock().await;

        let mut delivered = Vec::new();
        for stored in messages.iter_mut() {
            if delivered.len() >= request.max_messages as usize {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }
            let receipt_handle = uuid::Uuid::new_v4().simple().to_string();
            stored.receipt_handle = Some(receipt_handle.clone());
            stored.invisible_until = Some(now + request.visibility_timeout);
            delivered.push(RawMessage {
                message_id: Some(stored.message_id.clone()),
                receipt_handle,
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
            });
        }

        if delivered.is_empty() {
            Err(messages.iter().filter_map(|m| m.invisible_until).min())
        } else {
            Ok(delivered)
        }
    }
}

impl QueueBackend for InMemoryQueue {
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        let deadline = Instant::now() + request.wait_time;
        loop {
            // Register for wake-ups before looking, so a send in between is not missed
            let arrival = self.inner.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let next_visible = match self.take_visible(&request).await {
                Ok(delivered) => return Ok(delivered),
                Err(next_visible) => next_visible,
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn send(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<SendReceipt, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let md5 = md5_hex(&body);
        {
            let mut messages = self.inner.messages.lock().await;
            messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body,
                attributes,
                receipt_handle: None,
                invisible_until: None,
            });
        }
        self.inner.arrivals.notify_waiters();
        Ok(SendReceipt {
            message_id: Some(message_id),
            md5_of_body: Some(md5),
        })
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut messages = self.inner.messages.lock().await;
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))?;
        messages.remove(position);
        Ok(())
    }
}
