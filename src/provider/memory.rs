//! In-process queue provider.
//!
//! Emulates the hosted queue closely enough to drive the board end to end:
//! - standard queues deliver in arrival order but promise nothing about it
//! - FIFO queues (`.fifo` suffix) require a group id, keep order per group,
//!   hold back a group while one of its messages is in flight, and drop
//!   repeated deduplication ids inside the deduplication window
//! - deliveries stay hidden for the visibility timeout and come back with a
//!   higher receive count unless deleted with their latest receipt handle
//! - receives long-poll and wake up as soon as something becomes available

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::core::error::ProviderError;
use crate::core::message::current_timestamp;
use crate::provider::{
    system_attr, AttributeValue, InboundMessage, OutboundMessage, QueueProvider, QueueRef,
    ReceiveOptions, MAX_BATCH_SIZE,
};

/// Default FIFO deduplication window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    message_id: String,
    body: String,
    attributes: BTreeMap<String, AttributeValue>,
    group_id: Option<String>,
    dedup_id: Option<String>,
    receive_count: u32,
    sent_at_ms: u64,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    receipt_handle: String,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    /// Visible messages, sorted by `seq`.
    ready: VecDeque<StoredMessage>,
    /// Keyed by message id.
    in_flight: HashMap<String, InFlight>,
    /// Receipt handle -> message id, latest handle only.
    receipts: HashMap<String, String>,
    /// Deduplication id -> (first seen, message id).
    dedup: HashMap<String, (Instant, String)>,
}

impl QueueState {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                self.receipts.remove(&flight.receipt_handle);
                trace!(
                    target: "queueboard::provider",
                    message_id = %id,
                    "Visibility timeout expired, message visible again"
                );
                self.insert_ready(flight.message);
            }
        }
    }

    fn insert_ready(&mut self, message: StoredMessage) {
        let pos = self.ready.partition_point(|m| m.seq < message.seq);
        self.ready.insert(pos, message);
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }

    /// Picks deliverable messages without removing them yet.
    fn select(&self, fifo: bool, max: usize) -> Vec<usize> {
        if !fifo {
            return (0..self.ready.len().min(max)).collect();
        }

        let mut blocked: HashSet<&str> = self
            .in_flight
            .values()
            .filter_map(|f| f.message.group_id.as_deref())
            .collect();

        let mut picked = Vec::new();
        for (idx, msg) in self.ready.iter().enumerate() {
            if picked.len() >= max {
                break;
            }
            let Some(group) = msg.group_id.as_deref() else {
                continue;
            };
            // Only the head of each group is eligible.
            if blocked.insert(group) {
                picked.push(idx);
            }
        }
        picked
    }

    fn prune_dedup(&mut self, now: Instant, window: Duration) {
        self.dedup.retain(|_, (seen, _)| now.duration_since(*seen) < window);
    }
}

#[derive(Debug)]
struct MemoryQueue {
    fifo: bool,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    fn new(fifo: bool) -> Self {
        Self {
            fifo,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }
}

/// Thread-safe in-memory provider. Queues are created on first use.
#[derive(Debug)]
pub struct MemoryProvider {
    queues: DashMap<QueueRef, Arc<MemoryQueue>>,
    dedup_window: Duration,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

/// Visible and in-flight message counts of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub visible: usize,
    pub in_flight: usize,
}

impl MemoryProvider {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            queues: DashMap::new(),
            dedup_window,
        }
    }

    fn queue(&self, queue: &QueueRef) -> Arc<MemoryQueue> {
        self.queues
            .entry(queue.clone())
            .or_insert_with(|| {
                debug!(target: "queueboard::provider", %queue, "Creating in-memory queue");
                Arc::new(MemoryQueue::new(queue.is_fifo()))
            })
            .clone()
    }

    pub fn depth(&self, queue: &QueueRef) -> QueueDepth {
        match self.queues.get(queue) {
            Some(q) => {
                let state = q.state.lock();
                QueueDepth {
                    visible: state.ready.len(),
                    in_flight: state.in_flight.len(),
                }
            }
            None => QueueDepth::default(),
        }
    }

    /// Bodies of every message still held by `queue`, visible ones first.
    pub fn bodies(&self, queue: &QueueRef) -> Vec<String> {
        match self.queues.get(queue) {
            Some(q) => {
                let state = q.state.lock();
                state
                    .ready
                    .iter()
                    .map(|m| m.body.clone())
                    .chain(state.in_flight.values().map(|f| f.message.body.clone()))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn validate(queue: &MemoryQueue, queue_ref: &QueueRef, message: &OutboundMessage) -> Result<(), ProviderError> {
        if queue.fifo && message.group_id.is_none() {
            return Err(ProviderError::MissingGroupId(queue_ref.to_string()));
        }
        Ok(())
    }

    fn store(&self, queue: &MemoryQueue, message: OutboundMessage) -> String {
        let now = Instant::now();
        let mut state = queue.state.lock();

        let dedup_key = if queue.fifo {
            Some(message.dedup_id.clone().unwrap_or_else(|| message.body.clone()))
        } else {
            None
        };

        if let Some(key) = &dedup_key {
            state.prune_dedup(now, self.dedup_window);
            if let Some((_, existing)) = state.dedup.get(key) {
                debug!(
                    target: "queueboard::provider",
                    dedup_id = %key,
                    message_id = %existing,
                    "Duplicate send suppressed"
                );
                return existing.clone();
            }
        }

        let message_id = Uuid::new_v4().to_string();
        let seq = state.next_seq;
        state.next_seq += 1;
        if let Some(key) = dedup_key {
            state.dedup.insert(key, (now, message_id.clone()));
        }
        state.ready.push_back(StoredMessage {
            seq,
            message_id: message_id.clone(),
            body: message.body,
            attributes: message.attributes,
            group_id: message.group_id,
            dedup_id: message.dedup_id,
            receive_count: 0,
            sent_at_ms: current_timestamp(),
        });
        message_id
    }

    fn deliver(
        queue: &MemoryQueue,
        options: &ReceiveOptions,
        now: Instant,
    ) -> (Vec<InboundMessage>, Option<Instant>) {
        let mut state = queue.state.lock();
        state.requeue_expired(now);

        let max = options.max_messages.clamp(1, MAX_BATCH_SIZE as i32) as usize;
        let picked = state.select(queue.fifo, max);
        let visibility = Duration::from_secs(options.visibility_timeout_secs.max(0) as u64);

        // Remove from the back so earlier indices stay valid.
        let mut taken: Vec<StoredMessage> = picked
            .iter()
            .rev()
            .filter_map(|idx| state.ready.remove(*idx))
            .collect();
        taken.reverse();

        let mut delivered = Vec::with_capacity(taken.len());
        for mut message in taken {
            message.receive_count += 1;
            let receipt_handle = Uuid::new_v4().to_string();
            delivered.push(to_inbound(&message, &receipt_handle, options));
            state
                .receipts
                .insert(receipt_handle.clone(), message.message_id.clone());
            state.in_flight.insert(
                message.message_id.clone(),
                InFlight {
                    message,
                    receipt_handle,
                    visible_at: now + visibility,
                },
            );
        }

        (delivered, state.next_visible_at())
    }
}

fn wants(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n == "All" || n == ".*" || n == name)
}

fn to_inbound(message: &StoredMessage, receipt_handle: &str, options: &ReceiveOptions) -> InboundMessage {
    let mut attributes = BTreeMap::new();
    let mut put = |name: &str, value: String| {
        if wants(&options.attribute_names, name) {
            attributes.insert(name.to_owned(), value);
        }
    };
    put(
        system_attr::APPROXIMATE_RECEIVE_COUNT,
        message.receive_count.to_string(),
    );
    put(system_attr::SENT_TIMESTAMP, message.sent_at_ms.to_string());
    if let Some(group) = &message.group_id {
        put(system_attr::MESSAGE_GROUP_ID, group.clone());
    }
    if let Some(dedup) = &message.dedup_id {
        put(system_attr::MESSAGE_DEDUPLICATION_ID, dedup.clone());
    }

    let message_attributes = message
        .attributes
        .iter()
        .filter(|(name, _)| wants(&options.message_attribute_names, name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    InboundMessage {
        message_id: message.message_id.clone(),
        body: message.body.clone(),
        receipt_handle: receipt_handle.to_owned(),
        attributes,
        message_attributes,
    }
}

#[async_trait]
impl QueueProvider for MemoryProvider {
    async fn send(
        &self,
        queue_ref: &QueueRef,
        message: OutboundMessage,
    ) -> Result<String, ProviderError> {
        let queue = self.queue(queue_ref);
        Self::validate(&queue, queue_ref, &message)?;
        let id = self.store(&queue, message);
        queue.notify.notify_waiters();
        Ok(id)
    }

    async fn send_batch(
        &self,
        queue_ref: &QueueRef,
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

        let queue = self.queue(queue_ref);
        for message in &messages {
            Self::validate(&queue, queue_ref, message)?;
        }
        for message in messages {
            self.store(&queue, message);
        }
        queue.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue_ref: &QueueRef,
        options: &ReceiveOptions,
    ) -> Result<Vec<InboundMessage>, ProviderError> {
        let queue = self.queue(queue_ref);
        let wait = Duration::from_secs(options.wait_time_secs.max(0) as u64);
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking, so a send in between wakes us.
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let (delivered, next_visible) = Self::deliver(&queue, options, now);
            if !delivered.is_empty() || now >= deadline {
                return Ok(delivered);
            }

            let wake_at = next_visible.map_or(deadline, |v| v.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&self, queue_ref: &QueueRef, receipt_handle: &str) -> Result<(), ProviderError> {
        let queue = self.queue(queue_ref);
        {
            let mut state = queue.state.lock();
            let message_id = state
                .receipts
                .remove(receipt_handle)
                .ok_or_else(|| ProviderError::InvalidReceipt(receipt_handle.to_owned()))?;
            state.in_flight.remove(&message_id);
            trace!(target: "queueboard::provider", %message_id, "Message deleted");
        }
        // A FIFO group may have been unblocked.
        queue.notify.notify_waiters();
        Ok(())
    }
}
