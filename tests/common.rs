#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use queueboard::core::error::ProviderError;
use queueboard::core::subscriber::Subscription;
use queueboard::provider::{
    InboundMessage, MemoryProvider, OutboundMessage, QueueProvider, QueueRef, ReceiveOptions,
};
use queueboard::{Board, Config, Discipline, MessageCard, Stage};
use tokio::time::Instant;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = queueboard::logging::init_logging();
    });
}

pub const STANDARD: &str = "standard";
pub const FIFO: &str = "orders.fifo";
pub const STANDARD_DLQ: &str = "standard-dlq";
pub const FIFO_DLQ: &str = "orders-dlq.fifo";

/// Default lifecycle timings against in-memory queues, with a fixed seed.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.queues.standard = STANDARD.to_owned();
    config.queues.fifo = FIFO.to_owned();
    config.queues.standard_dlq = Some(STANDARD_DLQ.to_owned());
    config.queues.fifo_dlq = Some(FIFO_DLQ.to_owned());
    config.lifecycle.seed = Some(7);
    config
}

/// A snapshot as seen by an observer, stamped with (virtual) arrival time.
pub type Observed = (Instant, Board);

/// Reads snapshots until `done` holds for one of them.
pub async fn observe_until<F>(sub: &Subscription, limit: Duration, done: F) -> Vec<Observed>
where
    F: Fn(&Board) -> bool,
{
    let deadline = Instant::now() + limit;
    let mut seen: Vec<Observed> = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Ok(Some(snapshot)) => {
                let board = snapshot.decode().expect("snapshot decodes");
                let finished = done(&board);
                seen.push((Instant::now(), board));
                if finished {
                    return seen;
                }
            }
            Ok(None) => panic!("engine stopped broadcasting"),
            Err(_) => panic!(
                "condition not met within {limit:?}; last board: {:?}",
                seen.last().map(|(_, b)| b)
            ),
        }
    }
}

/// Stage of `id` in every snapshot, with consecutive repeats collapsed.
pub fn stage_path(seen: &[Observed], discipline: Discipline, id: &str) -> Vec<(Instant, Stage)> {
    let mut path: Vec<(Instant, Stage)> = Vec::new();
    for (at, board) in seen {
        if let Some(stage) = board.locate(discipline, id) {
            if path.last().map(|(_, s)| *s) != Some(stage) {
                path.push((*at, stage));
            }
        }
    }
    path
}

/// Every id seen on the discipline's lanes, in first-seen order.
pub fn ids_seen(seen: &[Observed], discipline: Discipline) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for (_, board) in seen {
        for stage in Stage::ALL {
            for card in board.lanes(discipline).list(stage) {
                if !ids.contains(&card.id) {
                    ids.push(card.id.clone());
                }
            }
        }
    }
    ids
}

pub fn all_cards(board: &Board, discipline: Discipline) -> Vec<&MessageCard> {
    Stage::ALL
        .iter()
        .flat_map(|s| board.lanes(discipline).list(*s).iter())
        .collect()
}

pub fn card(id: &str, discipline: Discipline, failure_rate: u8) -> MessageCard {
    MessageCard {
        id: id.to_owned(),
        body: format!("{}-0-{id}", discipline.body_prefix()),
        discipline,
        group_id: (discipline == Discipline::Fifo).then(|| "group-A".to_owned()),
        dedup_id: None,
        failure_rate,
        order: 1,
        retry_count: 0,
        error: None,
        created_at: None,
        receipt_handle: format!("rh-{id}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(QueueRef),
    SendBatch(QueueRef, usize),
    Delete(QueueRef, String),
}

/// In-memory provider that records calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    pub inner: MemoryProvider,
    calls: Mutex<Vec<Call>>,
    failing_receives: Mutex<Option<(QueueRef, usize)>>,
    failing_deletes: AtomicBool,
    /// Sends (single or batch) from this index on are rejected.
    failing_sends_from: Mutex<Option<usize>>,
    sends: AtomicUsize,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(_, handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// The next `n` receives on `queue` fail.
    pub fn fail_next_receives(&self, queue: &str, n: usize) {
        *self.failing_receives.lock() = Some((QueueRef::from(queue), n));
    }

    pub fn fail_deletes(&self, on: bool) {
        self.failing_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_sends_from(&self, index: usize) {
        *self.failing_sends_from.lock() = Some(index);
    }

    fn check_send(&self) -> Result<(), ProviderError> {
        let index = self.sends.fetch_add(1, Ordering::SeqCst);
        match *self.failing_sends_from.lock() {
            Some(from) if index >= from => Err(ProviderError::Unavailable("send rejected".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl QueueProvider for RecordingProvider {
    async fn send(&self, queue: &QueueRef, message: OutboundMessage) -> Result<String, ProviderError> {
        self.check_send()?;
        self.calls.lock().push(Call::Send(queue.clone()));
        self.inner.send(queue, message).await
    }

    async fn send_batch(
        &self,
        queue: &QueueRef,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), ProviderError> {
        self.check_send()?;
        self.calls.lock().push(Call::SendBatch(queue.clone(), messages.len()));
        self.inner.send_batch(queue, messages).await
    }

    async fn receive(
        &self,
        queue: &QueueRef,
        options: &ReceiveOptions,
    ) -> Result<Vec<InboundMessage>, ProviderError> {
        {
            let mut failing = self.failing_receives.lock();
            if let Some((target, left)) = failing.as_mut() {
                if target == queue && *left > 0 {
                    *left -= 1;
                    return Err(ProviderError::Unavailable("throttled".into()));
                }
            }
        }
        self.inner.receive(queue, options).await
    }

    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .push(Call::Delete(queue.clone(), receipt_handle.to_owned()));
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("delete rejected".into()));
        }
        self.inner.delete(queue, receipt_handle).await
    }
}
