//! Amazon SQS backend for the provider contract.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName, SendMessageBatchRequestEntry};
use aws_sdk_sqs::Client;
use tracing::{debug, warn};

use crate::core::error::ProviderError;
use crate::provider::{
    AttributeType, AttributeValue, InboundMessage, OutboundMessage, QueueProvider, QueueRef,
    ReceiveOptions, MAX_BATCH_SIZE,
};

fn sdk_error(e: impl std::error::Error) -> ProviderError {
    ProviderError::Sdk(DisplayErrorContext(e).to_string())
}

#[derive(Debug, Clone)]
pub struct SqsProvider {
    client: Client,
}

impl SqsProvider {
    /// Builds a client from the default credential chain.
    ///
    /// `endpoint_url` points the client at a local emulator when set.
    pub async fn connect(region: &str, endpoint_url: Option<&str>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        debug!(target: "queueboard::provider", region, ?endpoint_url, "SQS client ready");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_sdk_attributes(
    attributes: &BTreeMap<String, AttributeValue>,
) -> Result<HashMap<String, MessageAttributeValue>, ProviderError> {
    attributes
        .iter()
        .map(|(name, value)| {
            let sdk = MessageAttributeValue::builder()
                .data_type(value.data_type.as_str())
                .string_value(&value.value)
                .build()
                .map_err(sdk_error)?;
            Ok((name.clone(), sdk))
        })
        .collect()
}

fn from_sdk_message(message: &aws_sdk_sqs::types::Message) -> InboundMessage {
    let attributes = message
        .attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let message_attributes = message
        .message_attributes()
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|(k, v)| {
                    v.string_value().map(|s| {
                        (
                            k.clone(),
                            AttributeValue {
                                data_type: AttributeType::parse(v.data_type()),
                                value: s.to_owned(),
                            },
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        message_id: message.message_id().unwrap_or_default().to_owned(),
        body: message.body().unwrap_or_default().to_owned(),
        receipt_handle: message.receipt_handle().unwrap_or_default().to_owned(),
        attributes,
        message_attributes,
    }
}

#[async_trait]
impl QueueProvider for SqsProvider {
    async fn send(&self, queue: &QueueRef, message: OutboundMessage) -> Result<String, ProviderError> {
        let output = self
            .client
            .send_message()
            .queue_url(queue.as_str())
            .message_body(message.body)
            .set_message_attributes(Some(to_sdk_attributes(&message.attributes)?))
            .set_message_group_id(message.group_id)
            .set_message_deduplication_id(message.dedup_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(output.message_id().unwrap_or_default().to_owned())
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::EmptyBatch);
        }
        if messages.len() > MAX_BATCH_SIZE {
            return Err(ProviderError::BatchTooLarge {
                size: messages.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        let total = messages.len();
        let entries = messages
            .into_iter()
            .map(|m| {
                SendMessageBatchRequestEntry::builder()
                    .id(m.entry_id)
                    .message_body(m.body)
                    .set_message_attributes(Some(to_sdk_attributes(&m.attributes)?))
                    .set_message_group_id(m.group_id)
                    .set_message_deduplication_id(m.dedup_id)
                    .build()
                    .map_err(sdk_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue.as_str())
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(sdk_error)?;

        let failed = output.failed().len();
        if failed > 0 {
            for entry in output.failed() {
                warn!(
                    target: "queueboard::provider",
                    entry_id = entry.id(),
                    code = entry.code(),
                    "Batch entry rejected"
                );
            }
            return Err(ProviderError::PartialBatch { failed, total });
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        options: &ReceiveOptions,
    ) -> Result<Vec<InboundMessage>, ProviderError> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(options.max_messages)
            .visibility_timeout(options.visibility_timeout_secs)
            .wait_time_seconds(options.wait_time_secs);

        for name in &options.attribute_names {
            request = request.message_system_attribute_names(MessageSystemAttributeName::from(name.as_str()));
        }
        for name in &options.message_attribute_names {
            request = request.message_attribute_names(name);
        }

        let output = request.send().await.map_err(sdk_error)?;
        Ok(output.messages().iter().map(from_sdk_message).collect())
    }

    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), ProviderError> {
        self.client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}
