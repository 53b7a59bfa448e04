//! Narrow contract to the queue service.
//!
//! The rest of the crate only talks to a queue through [`QueueProvider`]:
//! enqueue (single or batch), long-poll receive, and delete by receipt
//! handle. Storage, ordering, deduplication and redelivery all belong to the
//! provider.

pub mod memory;
#[cfg(feature = "sqs")]
pub mod sqs;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::ProviderError;
use crate::core::message::Discipline;

pub use memory::MemoryProvider;
#[cfg(feature = "sqs")]
pub use sqs::SqsProvider;

/// Largest number of entries accepted by one batch send.
pub const MAX_BATCH_SIZE: usize = 10;

/// System attribute names, as understood by every provider.
pub mod system_attr {
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    pub const MESSAGE_GROUP_ID: &str = "MessageGroupId";
    pub const MESSAGE_DEDUPLICATION_ID: &str = "MessageDeduplicationId";
    pub const SENT_TIMESTAMP: &str = "SentTimestamp";
}

/// Address of a queue: a URL for hosted providers, a plain name in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueRef(pub String);

impl QueueRef {
    /// FIFO queues are recognised by the `.fifo` suffix.
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(".fifo")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueRef {
    fn from(s: &str) -> Self {
        QueueRef(s.to_owned())
    }
}

impl From<String> for QueueRef {
    fn from(s: String) -> Self {
        QueueRef(s)
    }
}

impl Deref for QueueRef {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Source queues per discipline, plus optional dead-letter targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSet {
    pub standard: QueueRef,
    pub fifo: QueueRef,
    pub standard_dlq: Option<QueueRef>,
    pub fifo_dlq: Option<QueueRef>,
}

impl QueueSet {
    pub fn new(standard: impl Into<QueueRef>, fifo: impl Into<QueueRef>) -> Self {
        Self {
            standard: standard.into(),
            fifo: fifo.into(),
            standard_dlq: None,
            fifo_dlq: None,
        }
    }

    pub fn with_dead_letters(
        mut self,
        standard: Option<QueueRef>,
        fifo: Option<QueueRef>,
    ) -> Self {
        self.standard_dlq = standard;
        self.fifo_dlq = fifo;
        self
    }

    pub fn source(&self, discipline: Discipline) -> &QueueRef {
        match discipline {
            Discipline::Standard => &self.standard,
            Discipline::Fifo => &self.fifo,
        }
    }

    pub fn dead_letter(&self, discipline: Discipline) -> Option<&QueueRef> {
        match discipline {
            Discipline::Standard => self.standard_dlq.as_ref(),
            Discipline::Fifo => self.fifo_dlq.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "String",
            AttributeType::Number => "Number",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("Number") {
            AttributeType::Number
        } else {
            AttributeType::String
        }
    }
}

/// A typed message attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub data_type: AttributeType,
    pub value: String,
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: AttributeType::String,
            value: value.into(),
        }
    }

    pub fn number(value: impl ToString) -> Self {
        Self {
            data_type: AttributeType::Number,
            value: value.to_string(),
        }
    }
}

/// One message handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Identifier local to a batch.
    pub entry_id: String,
    pub body: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
}

/// One message delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: String,
    /// System attributes (receive count, group id, ...).
    pub attributes: BTreeMap<String, String>,
    pub message_attributes: BTreeMap<String, AttributeValue>,
}

impl InboundMessage {
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .get(system_attr::APPROXIMATE_RECEIVE_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    pub fn group_id(&self) -> Option<&str> {
        self.attributes
            .get(system_attr::MESSAGE_GROUP_ID)
            .map(String::as_str)
    }

    pub fn dedup_id(&self) -> Option<&str> {
        self.attributes
            .get(system_attr::MESSAGE_DEDUPLICATION_ID)
            .map(String::as_str)
    }

    pub fn message_attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes.get(name).map(|v| v.value.as_str())
    }
}

/// Parameters of one receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: i32,
    pub visibility_timeout_secs: i32,
    pub wait_time_secs: i32,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout_secs: 30,
            wait_time_secs: 10,
            attribute_names: [
                system_attr::APPROXIMATE_RECEIVE_COUNT,
                system_attr::MESSAGE_GROUP_ID,
                system_attr::MESSAGE_DEDUPLICATION_ID,
                system_attr::SENT_TIMESTAMP,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            message_attribute_names: vec!["All".to_owned()],
        }
    }
}

#[async_trait]
pub trait QueueProvider: Send + Sync + fmt::Debug {
    /// Enqueues one message and returns the provider-assigned message id.
    async fn send(&self, queue: &QueueRef, message: OutboundMessage)
        -> Result<String, ProviderError>;

    /// Enqueues up to [`MAX_BATCH_SIZE`] messages in one call.
    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), ProviderError>;

    /// Long-polls for up to `options.max_messages` messages.
    async fn receive(
        &self,
        queue: &QueueRef,
        options: &ReceiveOptions,
    ) -> Result<Vec<InboundMessage>, ProviderError>;

    /// Acknowledges a delivery.
    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), ProviderError>;
}
