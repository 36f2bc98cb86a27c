//! Amazon SQS backend.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::{Credentials, Region};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use tracing::info;

use super::backend::{QueueBackend, RawMessage, ReceiveRequest, SendReceipt};
use super::error::QueueError;
use super::message::MessageAttributes;

const STRING_DATA_TYPE: &str = "String";
const ALL_ATTRIBUTES: &str = "All";

/// A queue identified by its URL.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Builds a client for `queue_url`.
    ///
    /// Region and credentials fall back to the default provider chain when
    /// not given; `credentials` is (access key id, secret).
    pub async fn connect(
        queue_url: impl Into<String>,
        region: Option<&str>,
        credentials: Option<(&str, &str)>,
    ) -> Self {
        let queue_url = queue_url.into();

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some((access_key_id, secret_access_key)) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "raq-crawler-config",
            ));
        }
        let sdk_config = loader.load().await;

        info!(queue_url = %queue_url, region = ?sdk_config.region(), "Connected to SQS");
        Self {
            client: Client::new(&sdk_config),
            queue_url,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn whole_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn transport_error<E: std::error::Error>(err: E) -> QueueError {
    QueueError::Transport(DisplayErrorContext(err).to_string())
}

impl QueueBackend for SqsQueue {
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(i32::try_from(request.max_messages).unwrap_or(i32::MAX))
            .wait_time_seconds(whole_seconds(request.wait_time))
            .visibility_timeout(whole_seconds(request.visibility_timeout))
            .message_attribute_names(ALL_ATTRIBUTES)
            .send()
            .await
            .map_err(transport_error)?;

        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| {
                let receipt_handle =
                    message
                        .receipt_handle
                        .ok_or_else(|| QueueError::MissingReceiptHandle {
                            message_id: message.message_id.clone(),
                        })?;
                let attributes: MessageAttributes = message
                    .message_attributes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(key, value)| value.string_value.map(|v| (key, v)))
                    .collect();
                Ok(RawMessage {
                    message_id: message.message_id,
                    receipt_handle,
                    body: message.body.unwrap_or_default(),
                    attributes,
                })
            })
            .collect()
    }

    async fn send(
        &self,
        body: String,
        attributes: MessageAttributes,
    ) -> Result<SendReceipt, QueueError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .delay_seconds(0);
        for (key, value) in attributes {
            let value = MessageAttributeValue::builder()
                .data_type(STRING_DATA_TYPE)
                .string_value(value)
                .build()
                .map_err(transport_error)?;
            request = request.message_attributes(key, value);
        }

        let output = request.send().await.map_err(transport_error)?;
        Ok(SendReceipt {
            message_id: output.message_id,
            md5_of_body: output.md5_of_message_body,
        })
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_saturate_to_seconds() {
        assert_eq!(whole_seconds(Duration::from_millis(20_900)), 20);
        assert_eq!(whole_seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
