//! The queue consumption protocol.

use std::time::Duration;

use md5::{Digest, Md5};
use serde::Serialize;
use tracing::{debug, trace};

use super::backend::{QueueBackend, ReceiveRequest, SendReceipt};
use super::error::QueueError;
use super::message::{MessageAttributes, QueuedMessage};

/// Default long-poll window.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

/// Default visibility timeout for received messages.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Hex MD5 of a message body, as queue services report it.
pub fn md5_hex(body: &str) -> String {
    hex::encode(Md5::digest(body.as_bytes()))
}

/// One-message-at-a-time client over a [`QueueBackend`].
#[derive(Debug, Clone)]
pub struct MessageQueueClient<B> {
    backend: B,
    wait_time: Duration,
    visibility_timeout: Duration,
}

impl<B: QueueBackend> MessageQueueClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            wait_time: DEFAULT_WAIT_TIME,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Long-polls for exactly one message.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NoMessages`] if the wait window elapsed with nothing to deliver
    /// - [`QueueError::TooManyMessages`] if the backend returned more than one
    /// - transport errors from the backend
    pub async fn pop_next(&self) -> Result<QueuedMessage, QueueError> {
        let request = ReceiveRequest {
            max_messages: 1,
            wait_time: self.wait_time,
            visibility_timeout: self.visibility_timeout,
        };
        let mut messages = self.backend.receive(request).await?;

        if messages.len() > request.max_messages as usize {
            return Err(QueueError::TooManyMessages {
                requested: request.max_messages,
                received: messages.len(),
            });
        }

        match messages.pop() {
            Some(raw) => {
                let message = QueuedMessage::from_raw(raw);
                debug!(
                    message_id = message.log_id(),
                    task_type = message.task.kind(),
                    "Received message"
                );
                Ok(message)
            }
            None => Err(QueueError::NoMessages {
                waited: self.wait_time,
            }),
        }
    }

    /// Serializes `body` as JSON and enqueues it with zero delay.
    ///
    /// The backend's receipt must carry a message id and the MD5 of exactly
    /// the body that was sent; otherwise the write counts as failed.
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        body: &T,
        attributes: MessageAttributes,
    ) -> Result<SendReceipt, QueueError> {
        let text = serde_json::to_string(body)?;
        let expected_md5 = md5_hex(&text);

        let receipt = self.backend.send(text, attributes).await?;
        verify_receipt(&receipt, &expected_md5)?;

        trace!(message_id = ?receipt.message_id, "Message written");
        Ok(receipt)
    }

    /// Acknowledges a message so it is never redelivered.
    pub async fn delete(&self, message: QueuedMessage) -> Result<(), QueueError> {
        self.backend.delete(&message.receipt_handle).await?;
        debug!(message_id = message.log_id(), "Deleted message");
        Ok(())
    }
}

fn verify_receipt(receipt: &SendReceipt, expected_md5: &str) -> Result<(), QueueError> {
    if receipt.message_id.as_deref().is_none_or(str::is_empty) {
        return Err(QueueError::WriteNotAcknowledged {
            reason: "receipt has no message id".to_string(),
        });
    }
    match receipt.md5_of_body.as_deref() {
        None => Err(QueueError::WriteNotAcknowledged {
            reason: "receipt has no body checksum".to_string(),
        }),
        Some(md5) if !md5.eq_ignore_ascii_case(expected_md5) => {
            Err(QueueError::WriteNotAcknowledged {
                reason: format!("body checksum {} does not match {}", md5, expected_md5),
            })
        }
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueue, RawMessage};
    use crate::types::Task;
    use serde_json::json;

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn receipt_verification() {
        let good = SendReceipt {
            message_id: Some("id".into()),
            md5_of_body: Some(md5_hex("x")),
        };
        assert!(verify_receipt(&good, &md5_hex("x")).is_ok());

        let upper = SendReceipt {
            md5_of_body: Some(md5_hex("x").to_uppercase()),
            ..good.clone()
        };
        assert!(verify_receipt(&upper, &md5_hex("x")).is_ok());

        for bad in [
            SendReceipt {
                message_id: None,
                ..good.clone()
            },
            SendReceipt {
                message_id: Some(String::new()),
                ..good.clone()
            },
            SendReceipt {
                md5_of_body: None,
                ..good.clone()
            },
            SendReceipt {
                md5_of_body: Some(md5_hex("y")),
                ..good.clone()
            },
        ] {
            let err = verify_receipt(&bad, &md5_hex("x")).unwrap_err();
            assert!(err.is_contract_violation(), "{:?}", bad);
        }
    }

    fn client(queue: &InMemoryQueue) -> MessageQueueClient<InMemoryQueue> {
        MessageQueueClient::new(queue.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_reports_idle_after_wait_window() {
        let queue = InMemoryQueue::new();
        let client = client(&queue).with_wait_time(Duration::from_secs(20));

        let started = tokio::time::Instant::now();
        let err = client.pop_next().await.unwrap_err();

        assert!(err.is_idle(), "{:?}", err);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn write_then_pop_round_trips_body_and_attributes() {
        let queue = InMemoryQueue::new();
        let client = client(&queue);
        let body = json!({"a": 1, "langs": {"c": 2}});
        let attributes = MessageAttributes::from([
            ("creator_id".to_string(), "w1".to_string()),
            ("creator_started_timestamp".to_string(), "2024-01-01T00:00:00Z".to_string()),
        ]);

        let receipt = client.write(&body, attributes.clone()).await.unwrap();
        let message = client.pop_next().await.unwrap();

        assert_eq!(message.body, body);
        assert_eq!(message.attributes, attributes);
        assert_eq!(message.message_id, receipt.message_id);
        assert!(matches!(message.task, Task::Unknown(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn undeleted_message_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryQueue::new();
        let client = client(&queue)
            .with_wait_time(Duration::from_secs(1))
            .with_visibility_timeout(Duration::from_secs(30));
        client.write(&json!({"n": 1}), MessageAttributes::new()).await.unwrap();

        let first = client.pop_next().await.unwrap();
        assert!(client.pop_next().await.unwrap_err().is_idle());

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = client.pop_next().await.unwrap();

        assert_eq!(second.message_id, first.message_id);
        assert_ne!(second.receipt_handle, first.receipt_handle);
        client.delete(second).await.unwrap();
        assert_eq!(queue.visible_len().await + queue.in_flight_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_message_is_gone() {
        let queue = InMemoryQueue::new();
        let client = client(&queue).with_wait_time(Duration::from_secs(1));
        client.write(&json!({"n": 1}), MessageAttributes::new()).await.unwrap();

        let message = client.pop_next().await.unwrap();
        client.delete(message).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(client.pop_next().await.unwrap_err().is_idle());
    }

    /// Backend that ignores the requested maximum.
    struct Flooding;

    impl QueueBackend for Flooding {
        async fn receive(&self, _request: ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
            Ok((0..3)
                .map(|i| RawMessage {
                    message_id: Some(format!("m{}", i)),
                    receipt_handle: format!("r{}", i),
                    body: "{}".into(),
                    attributes: MessageAttributes::new(),
                })
                .collect())
        }

        async fn send(
            &self,
            _body: String,
            _attributes: MessageAttributes,
        ) -> Result<SendReceipt, QueueError> {
            Ok(SendReceipt {
                message_id: Some("m".into()),
                md5_of_body: Some("0".repeat(32)),
            })
        }

        async fn delete(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn too_many_messages_is_a_contract_violation() {
        let client = MessageQueueClient::new(Flooding);
        let err = client.pop_next().await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::TooManyMessages {
                requested: 1,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn bad_checksum_fails_the_write() {
        let client = MessageQueueClient::new(Flooding);
        let err = client
            .write(&json!({"a": 1}), MessageAttributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::WriteNotAcknowledged { .. }));
    }
}
