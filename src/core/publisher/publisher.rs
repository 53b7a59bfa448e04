use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::error::ProducerError;
use crate::core::message::{current_timestamp, Discipline, ATTR_FAILURE_RATE, ATTR_TIMESTAMP};
use crate::provider::{AttributeValue, OutboundMessage, QueueProvider, QueueSet, MAX_BATCH_SIZE};

/// Upper bound on messages per enqueue request.
pub const MAX_ENQUEUE_COUNT: usize = 10_000;

/// Per-request simulation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Probability, in percent, that each processing attempt fails.
    pub failure_rate: u32,
    /// Required for FIFO, ignored for standard.
    pub group_id: Option<String>,
}

/// Result handed back to the command interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub ok: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub batches: usize,
}

/// Sends simulated traffic to the source queues.
///
/// Enqueue is not transactional: the first failing batch aborts the rest, and
/// batches already accepted by the provider stay enqueued.
#[derive(Debug, Clone)]
pub struct Producer {
    provider: Arc<dyn QueueProvider>,
    queues: QueueSet,
}

impl Producer {
    pub fn new(provider: Arc<dyn QueueProvider>, queues: QueueSet) -> Self {
        Self { provider, queues }
    }

    pub async fn enqueue_standard(
        &self,
        count: usize,
        failure_rate: u32,
    ) -> Result<EnqueueReceipt, ProducerError> {
        self.enqueue(
            Discipline::Standard,
            count,
            EnqueueOptions {
                failure_rate,
                group_id: None,
            },
        )
        .await
    }

    pub async fn enqueue_fifo(
        &self,
        count: usize,
        group_id: impl Into<String>,
        failure_rate: u32,
    ) -> Result<EnqueueReceipt, ProducerError> {
        self.enqueue(
            Discipline::Fifo,
            count,
            EnqueueOptions {
                failure_rate,
                group_id: Some(group_id.into()),
            },
        )
        .await
    }

    pub async fn enqueue(
        &self,
        discipline: Discipline,
        count: usize,
        options: EnqueueOptions,
    ) -> Result<EnqueueReceipt, ProducerError> {
        validate(discipline, count, &options)?;
        let queue = self.queues.source(discipline);
        let stamp = Stamp::now();
        let total = count.div_ceil(MAX_BATCH_SIZE);

        for b in 0..total {
            let mut batch = build_batch(discipline, b, count, &options, &stamp);
            let size = batch.len();
            let sent = if size == 1 {
                match batch.pop() {
                    Some(message) => self.provider.send(queue, message).await.map(|_| ()),
                    None => Ok(()),
                }
            } else {
                self.provider.send_batch(queue, batch).await
            };

            if let Err(e) = sent {
                error!(
                    target: "queueboard::producer",
                    %discipline,
                    %queue,
                    batch = b,
                    error = %e,
                    "Enqueue aborted"
                );
                return Err(e.into());
            }
            debug!(target: "queueboard::producer", %discipline, batch = b, size, "Batch sent");
        }

        info!(
            target: "queueboard::producer",
            %discipline,
            %queue,
            count,
            batches = total,
            failure_rate = options.failure_rate,
            group = options.group_id.as_deref().unwrap_or("-"),
            "Enqueued messages"
        );
        Ok(EnqueueReceipt {
            ok: true,
            count,
            group_id: match discipline {
                Discipline::Fifo => options.group_id,
                Discipline::Standard => None,
            },
            batches: total,
        })
    }
}

fn validate(discipline: Discipline, count: usize, options: &EnqueueOptions) -> Result<(), ProducerError> {
    if count == 0 {
        return Err(ProducerError::InvalidCount);
    }
    if count > MAX_ENQUEUE_COUNT {
        return Err(ProducerError::CountTooLarge {
            max: MAX_ENQUEUE_COUNT,
        });
    }
    if options.failure_rate > 100 {
        return Err(ProducerError::InvalidFailureRate(f64::from(options.failure_rate)));
    }
    if discipline == Discipline::Fifo
        && options.group_id.as_deref().map_or(true, |g| g.trim().is_empty())
    {
        return Err(ProducerError::EmptyGroupId);
    }
    Ok(())
}

/// Creation time shared by every message of one request.
struct Stamp {
    millis: u64,
    rfc3339: String,
}

impl Stamp {
    fn now() -> Self {
        Self {
            millis: current_timestamp(),
            rfc3339: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Range of message indices carried by batch `b` of a `count`-message request.
fn batch_range(b: usize, count: usize) -> Range<usize> {
    let start = b.saturating_mul(MAX_BATCH_SIZE).min(count);
    start..start + (count - start).min(MAX_BATCH_SIZE)
}

/// Builds batch `b` only; a request never holds more than one batch in memory.
fn build_batch(
    discipline: Discipline,
    b: usize,
    count: usize,
    options: &EnqueueOptions,
    stamp: &Stamp,
) -> Vec<OutboundMessage> {
    let fifo = discipline == Discipline::Fifo;
    batch_range(b, count)
        .enumerate()
        .map(|(i, index)| {
            let mut attributes = BTreeMap::new();
            attributes.insert(ATTR_FAILURE_RATE.to_owned(), AttributeValue::number(options.failure_rate));
            attributes.insert(ATTR_TIMESTAMP.to_owned(), AttributeValue::string(stamp.rfc3339.clone()));
            OutboundMessage {
                entry_id: format!("msg-{b}-{i}"),
                body: format!("{}-{}-{index}", discipline.body_prefix(), stamp.millis),
                attributes,
                group_id: if fifo { options.group_id.clone() } else { None },
                dedup_id: fifo.then(|| Uuid::new_v4().to_string()),
            }
        })
        .collect()
}
