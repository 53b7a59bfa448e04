//! Consumer loop: one per discipline.
//!
//! Each cycle long-polls the provider, turns deliveries into board cards and
//! hands them to the engine. A failed poll is logged and followed by a fixed
//! pause; the loop only ends when the engine is gone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::engine::EngineHandle;
use crate::core::error::ConsumerError;
use crate::core::message::{parse_failure_rate, Discipline, MessageCard, ATTR_FAILURE_RATE, ATTR_TIMESTAMP};
use crate::provider::{InboundMessage, QueueProvider, QueueRef, ReceiveOptions};
use crate::util::backoff;

/// Default pause after a failed poll.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(30);

pub struct Consumer {
    discipline: Discipline,
    queue: QueueRef,
    provider: Arc<dyn QueueProvider>,
    engine: EngineHandle,
    options: ReceiveOptions,
    error_backoff: Duration,
    next_order: u64,
}

impl Consumer {
    pub fn new(
        discipline: Discipline,
        queue: QueueRef,
        provider: Arc<dyn QueueProvider>,
        engine: EngineHandle,
    ) -> Self {
        Self {
            discipline,
            queue,
            provider,
            engine,
            options: Self::default_options(discipline),
            error_backoff: DEFAULT_ERROR_BACKOFF,
            next_order: 0,
        }
    }

    /// Standard polls up to 10 messages at a time, FIFO one.
    pub fn default_options(discipline: Discipline) -> ReceiveOptions {
        let max_messages = match discipline {
            Discipline::Standard => 10,
            Discipline::Fifo => 1,
        };
        ReceiveOptions {
            max_messages,
            ..ReceiveOptions::default()
        }
    }

    pub fn with_options(mut self, options: ReceiveOptions) -> Self {
        self.options = options;
        self
    }

    /// Upper bound of the pause after a failed poll.
    pub fn with_error_backoff(mut self, cap: Duration) -> Self {
        self.error_backoff = cap;
        self
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Runs one receive cycle and returns the number of cards handed over.
    pub async fn poll_once(&mut self) -> Result<usize, ConsumerError> {
        let messages = self.provider.receive(&self.queue, &self.options).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let cards: Vec<MessageCard> = messages.into_iter().map(|m| self.to_card(m)).collect();
        let n = cards.len();
        debug!(
            target: "queueboard::consumer",
            discipline = %self.discipline,
            queue = %self.queue,
            count = n,
            "Received messages"
        );
        self.engine.ingest(self.discipline, cards)?;
        Ok(n)
    }

    fn to_card(&mut self, message: InboundMessage) -> MessageCard {
        self.next_order += 1;
        let fifo = self.discipline == Discipline::Fifo;
        MessageCard {
            failure_rate: parse_failure_rate(message.message_attribute(ATTR_FAILURE_RATE)),
            retry_count: message.receive_count().saturating_sub(1),
            group_id: fifo.then(|| message.group_id().map(str::to_owned)).flatten(),
            dedup_id: fifo.then(|| message.dedup_id().map(str::to_owned)).flatten(),
            created_at: message.message_attribute(ATTR_TIMESTAMP).map(str::to_owned),
            order: self.next_order,
            error: None,
            discipline: self.discipline,
            id: message.message_id,
            body: message.body,
            receipt_handle: message.receipt_handle,
        }
    }

    /// Polls until the engine stops accepting cards.
    pub async fn run(mut self) {
        info!(
            target: "queueboard::consumer",
            discipline = %self.discipline,
            queue = %self.queue,
            max_messages = self.options.max_messages,
            "Consumer loop started"
        );
        let pause = backoff::poll_error_delay(Duration::from_secs(1), self.error_backoff);

        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(ConsumerError::Poll(e)) => {
                    warn!(
                        target: "queueboard::consumer",
                        discipline = %self.discipline,
                        queue = %self.queue,
                        error = %e,
                        retry_in_ms = pause.as_millis() as u64,
                        "Poll failed"
                    );
                    tokio::time::sleep(pause).await;
                }
                Err(ConsumerError::Engine(_)) => break,
            }
        }
        info!(target: "queueboard::consumer", discipline = %self.discipline, "Consumer loop stopped");
    }
}
