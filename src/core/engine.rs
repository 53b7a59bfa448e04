//! Lifecycle engine.
//!
//! One task owns the [`Board`], the [`RetryRegistry`], the [`BroadcastHub`]
//! and the [`TimerQueue`]. Consumers and observers reach it through an
//! [`EngineHandle`]; commands and due timers are handled one at a time, so no
//! two board mutations ever overlap and every mutation is broadcast before
//! the next one starts.
//!
//! ```text
//! received ──1u──▶ processing ──ok──3u──▶ done           (delete)
//!                       │
//!                       └──fail──▶ failed ──2^n u──▶ received
//!                                     └──(n ≥ 3) 2u──▶ dlq
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::core::board::{Board, Stage};
use crate::core::error::EngineError;
use crate::core::message::{
    Discipline, MessageCard, ATTR_FAILURE_RATE, ATTR_TIMESTAMP, MAX_RETRIES_EXCEEDED,
};
use crate::core::retry::{FailureSimulator, RetryDecision, RetryPolicy, RetryRegistry};
use crate::core::subscriber::{BroadcastHub, SubscriberId, Subscription};
use crate::core::timers::{TimerQueue, Transition};
use crate::provider::{AttributeValue, OutboundMessage, QueueProvider, QueueRef, QueueSet};

/// Static settings of an engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: RetryPolicy,
    pub queues: QueueSet,
    /// Fixed seed for the failure draw; entropy when `None`.
    pub seed: Option<u64>,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub tracked_retries: usize,
    pub pending_timers: usize,
    pub observers: usize,
}

enum Command {
    Ingest {
        discipline: Discipline,
        cards: Vec<MessageCard>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Snapshot {
        reply: oneshot::Sender<Board>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Cloneable entry point to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Ingest { discipline, cards } => f
                .debug_struct("Ingest")
                .field("discipline", discipline)
                .field("cards", &cards.len())
                .finish(),
            Command::Subscribe { .. } => f.write_str("Subscribe"),
            Command::Unsubscribe { id } => f.debug_tuple("Unsubscribe").field(id).finish(),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
            Command::Stats { .. } => f.write_str("Stats"),
        }
    }
}

impl EngineHandle {
    /// Hands freshly received cards to the engine. Never blocks.
    pub fn ingest(&self, discipline: Discipline, cards: Vec<MessageCard>) -> Result<(), EngineError> {
        if cards.is_empty() {
            return Ok(());
        }
        self.commands
            .send(Command::Ingest { discipline, cards })
            .map_err(|_| EngineError)
    }

    /// Registers an observer; the current board is its first snapshot.
    pub async fn subscribe(&self) -> Result<Subscription, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply })
            .map_err(|_| EngineError)?;
        rx.await.map_err(|_| EngineError)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), EngineError> {
        self.commands
            .send(Command::Unsubscribe { id })
            .map_err(|_| EngineError)
    }

    /// A copy of the board as of now.
    pub async fn snapshot(&self) -> Result<Board, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| EngineError)?;
        rx.await.map_err(|_| EngineError)
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| EngineError)?;
        rx.await.map_err(|_| EngineError)
    }
}

pub struct Engine {
    board: Board,
    retries: RetryRegistry,
    hub: BroadcastHub,
    timers: TimerQueue,
    simulator: FailureSimulator,
    policy: RetryPolicy,
    queues: QueueSet,
    provider: Arc<dyn QueueProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Engine {
    /// Starts the engine on the current runtime.
    pub fn spawn(config: EngineConfig, provider: Arc<dyn QueueProvider>) -> (EngineHandle, JoinHandle<()>) {
        let (engine, handle) = Self::new(config, provider);
        let task = tokio::spawn(engine.run());
        (handle, task)
    }

    fn new(config: EngineConfig, provider: Arc<dyn QueueProvider>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let simulator = match config.seed {
            Some(seed) => FailureSimulator::seeded(seed),
            None => FailureSimulator::from_entropy(),
        };
        let engine = Engine {
            board: Board::new(),
            retries: RetryRegistry::new(),
            hub: BroadcastHub::new(),
            timers: TimerQueue::new(),
            simulator,
            policy: config.policy,
            queues: config.queues,
            provider,
            commands: rx,
        };
        (engine, EngineHandle { commands: tx })
    }

    async fn run(mut self) {
        info!(target: "queueboard::engine", "Lifecycle engine started");
        let mut accepting = true;

        loop {
            let deadline = self.timers.next_deadline();
            if !accepting && deadline.is_none() {
                break;
            }

            tokio::select! {
                cmd = self.commands.recv(), if accepting => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => accepting = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due(Instant::now());
                }
            }
        }
        info!(target: "queueboard::engine", "Lifecycle engine stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Ingest { discipline, cards } => {
                for card in cards {
                    self.ingest(discipline, card);
                }
            }
            Command::Subscribe { reply } => match self.hub.subscribe(&self.board) {
                Ok(sub) => {
                    if reply.send(sub).is_err() {
                        trace!(target: "queueboard::engine", "Subscriber went away before registration completed");
                    }
                }
                Err(e) => error!(target: "queueboard::engine", error = %e, "Failed to encode board snapshot"),
            },
            Command::Unsubscribe { id } => {
                self.hub.unsubscribe(&id);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.board.clone());
            }
            Command::Stats { reply } => {
                let _ = reply.send(EngineStats {
                    tracked_retries: self.retries.len(),
                    pending_timers: self.timers.pending_count(),
                    observers: self.hub.len(),
                });
            }
        }
    }

    fn broadcast(&mut self) {
        if let Err(e) = self.hub.notify(&self.board) {
            error!(target: "queueboard::engine", error = %e, "Failed to encode board snapshot");
        }
    }

    fn arm(&mut self, discipline: Discipline, id: &str, from: Stage, to: Stage, epoch: u64, delay: Duration) {
        self.timers.schedule(
            Instant::now(),
            delay,
            Transition {
                discipline,
                id: id.to_owned(),
                from,
                to,
                epoch,
            },
        );
    }

    fn ingest(&mut self, discipline: Discipline, card: MessageCard) {
        if let Some(slot) = self.board.slot(discipline, &card.id) {
            self.redelivered(discipline, card, slot.stage);
            return;
        }

        self.retries.seed(&card.id, card.retry_count);
        let id = card.id.clone();
        info!(
            target: "queueboard::engine",
            %discipline,
            message_id = %id,
            order = card.order,
            group = card.group_id.as_deref().unwrap_or("-"),
            "Message received"
        );
        match self.board.insert(Stage::Received, card) {
            Ok(slot) => {
                self.broadcast();
                let delay = self.policy.processing_delay;
                self.arm(discipline, &id, Stage::Received, Stage::Processing, slot.epoch, delay);
            }
            Err(card) => warn!(target: "queueboard::engine", message_id = %card.id, "Card already tracked"),
        }
    }

    /// The provider delivered an id the board already tracks.
    fn redelivered(&mut self, discipline: Discipline, card: MessageCard, stage: Stage) {
        let Some(tracked) = self.board.get_mut(discipline, &card.id) else {
            return;
        };
        tracked.receipt_handle = card.receipt_handle;

        match stage {
            Stage::Done => {
                debug!(target: "queueboard::engine", %discipline, message_id = %card.id, "Completed message redelivered, acknowledging again");
                let handle = tracked.receipt_handle.clone();
                self.acknowledge(discipline, card.id, handle);
            }
            Stage::Dlq => {
                if self.queues.dead_letter(discipline).is_some() {
                    let tracked = tracked.clone();
                    self.hand_off_dead_letter(discipline, tracked);
                } else {
                    debug!(target: "queueboard::engine", %discipline, message_id = %card.id, "Dead-lettered message redelivered, ignoring");
                }
            }
            _ => {
                debug!(
                    target: "queueboard::engine",
                    %discipline,
                    message_id = %card.id,
                    %stage,
                    "Provider redelivered a message still in the local pipeline"
                );
            }
        }
    }

    fn fire_due(&mut self, now: Instant) {
        while let Some(transition) = self.timers.pop_due(now) {
            self.apply(transition);
        }
    }

    fn apply(&mut self, t: Transition) {
        match self.board.slot(t.discipline, &t.id) {
            Some(slot) if slot.stage == t.from && slot.epoch == t.epoch => {}
            _ => {
                trace!(target: "queueboard::engine", message_id = %t.id, to = %t.to, "Dropping stale transition");
                return;
            }
        }

        match t.to {
            Stage::Processing => self.start_processing(t.discipline, &t.id),
            Stage::Done => self.complete(t.discipline, &t.id),
            Stage::Received => self.retry(t.discipline, &t.id),
            Stage::Dlq => self.dead_letter(t.discipline, &t.id),
            Stage::Failed => {}
        }
    }

    fn start_processing(&mut self, discipline: Discipline, id: &str) {
        let Some((card, _)) = self.board.move_to(discipline, id, Stage::Processing) else {
            return;
        };
        let failure_rate = card.failure_rate;
        debug!(target: "queueboard::engine", %discipline, message_id = %id, "Processing");
        self.broadcast();

        if !self.simulator.should_fail(failure_rate) {
            let epoch = match self.board.slot(discipline, id) {
                Some(slot) => slot.epoch,
                None => return,
            };
            let delay = self.policy.done_delay;
            self.arm(discipline, id, Stage::Processing, Stage::Done, epoch, delay);
            return;
        }

        let attempt = self.retries.record_failure(id);
        let Some((card, slot)) = self.board.move_to(discipline, id, Stage::Failed) else {
            return;
        };
        card.retry_count = attempt;
        card.error = Some(MessageCard::attempt_error(attempt));
        warn!(
            target: "queueboard::engine",
            %discipline,
            message_id = %id,
            attempt,
            failure_rate,
            "Simulated processing failure"
        );
        self.broadcast();

        match self.policy.decide(attempt) {
            RetryDecision::Retry { after } => {
                self.arm(discipline, id, Stage::Failed, Stage::Received, slot.epoch, after);
            }
            RetryDecision::DeadLetter { after } => {
                self.arm(discipline, id, Stage::Failed, Stage::Dlq, slot.epoch, after);
            }
        }
    }

    fn complete(&mut self, discipline: Discipline, id: &str) {
        let Some((card, _)) = self.board.move_to(discipline, id, Stage::Done) else {
            return;
        };
        card.error = None;
        let handle = card.receipt_handle.clone();
        self.retries.clear(id);
        info!(target: "queueboard::engine", %discipline, message_id = %id, "Message done");
        self.broadcast();
        self.acknowledge(discipline, id.to_owned(), handle);
    }

    fn retry(&mut self, discipline: Discipline, id: &str) {
        let Some((card, slot)) = self.board.move_to(discipline, id, Stage::Received) else {
            return;
        };
        card.error = None;
        debug!(target: "queueboard::engine", %discipline, message_id = %id, attempt = card.retry_count, "Retrying");
        self.broadcast();
        let delay = self.policy.processing_delay;
        self.arm(discipline, id, Stage::Received, Stage::Processing, slot.epoch, delay);
    }

    fn dead_letter(&mut self, discipline: Discipline, id: &str) {
        let Some((card, _)) = self.board.move_to(discipline, id, Stage::Dlq) else {
            return;
        };
        card.error = Some(MAX_RETRIES_EXCEEDED.to_owned());
        let card = card.clone();
        self.retries.clear(id);
        warn!(
            target: "queueboard::engine",
            %discipline,
            message_id = %id,
            attempts = card.retry_count,
            "Message dead-lettered"
        );
        self.broadcast();

        if self.queues.dead_letter(discipline).is_some() {
            self.hand_off_dead_letter(discipline, card);
        }
    }

    /// Deletes a delivery in the background; failures are only logged.
    fn acknowledge(&self, discipline: Discipline, id: String, receipt_handle: String) {
        let provider = Arc::clone(&self.provider);
        let queue = self.queues.source(discipline).clone();
        tokio::spawn(async move {
            match provider.delete(&queue, &receipt_handle).await {
                Ok(()) => trace!(target: "queueboard::engine", %queue, message_id = %id, "Acknowledged"),
                Err(e) => warn!(
                    target: "queueboard::engine",
                    %queue,
                    message_id = %id,
                    error = %e,
                    "Delete failed; provider may redeliver"
                ),
            }
        });
    }

    /// Forwards a dead-lettered card to the configured dead-letter queue and
    /// removes it from its source queue.
    fn hand_off_dead_letter(&self, discipline: Discipline, card: MessageCard) {
        let Some(target) = self.queues.dead_letter(discipline).cloned() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        let source = self.queues.source(discipline).clone();
        tokio::spawn(async move {
            let message = dead_letter_message(&card, &target);
            if let Err(e) = provider.send(&target, message).await {
                warn!(
                    target: "queueboard::engine",
                    queue = %target,
                    message_id = %card.id,
                    error = %e,
                    "Dead-letter forward failed"
                );
                return;
            }
            if let Err(e) = provider.delete(&source, &card.receipt_handle).await {
                warn!(
                    target: "queueboard::engine",
                    queue = %source,
                    message_id = %card.id,
                    error = %e,
                    "Delete after dead-letter forward failed"
                );
            }
        });
    }
}

fn dead_letter_message(card: &MessageCard, target: &QueueRef) -> OutboundMessage {
    let mut attributes = BTreeMap::new();
    attributes.insert(ATTR_FAILURE_RATE.to_owned(), AttributeValue::number(card.failure_rate));
    if let Some(created) = &card.created_at {
        attributes.insert(ATTR_TIMESTAMP.to_owned(), AttributeValue::string(created.clone()));
    }
    let fifo = target.is_fifo();
    OutboundMessage {
        entry_id: format!("dlq-{}", card.order),
        body: card.body.clone(),
        attributes,
        group_id: if fifo {
            Some(card.group_id.clone().unwrap_or_else(|| "dead-letter".to_owned()))
        } else {
            None
        },
        dedup_id: fifo.then(|| card.id.clone()),
    }
}
