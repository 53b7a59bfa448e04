use std::collections::HashMap;

use tracing::debug;

use crate::core::board::Board;
use crate::core::subscriber::{Snapshot, SubscriberId, Subscription};

/// Registry of live observers.
///
/// Owned by the engine task, so registration changes and broadcasts are
/// serialised with every board mutation.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    subscribers: HashMap<SubscriberId, flume::Sender<Snapshot>>,
    next_id: u64,
    last: Option<Snapshot>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and queues the current snapshot for it.
    pub fn subscribe(&mut self, board: &Board) -> serde_json::Result<Subscription> {
        let snapshot = match &self.last {
            Some(s) => s.clone(),
            None => {
                let s = Snapshot::encode(board)?;
                self.last = Some(s.clone());
                s
            }
        };

        self.next_id += 1;
        let id = SubscriberId::from(format!("observer-{}", self.next_id));
        let (tx, rx) = flume::unbounded();
        // Cannot fail: we still hold the receiver.
        let _ = tx.send(snapshot);
        self.subscribers.insert(id.clone(), tx);
        debug!(target: "queueboard::hub", subscriber = %id, total = self.subscribers.len(), "Observer subscribed");
        Ok(Subscription::new(id, rx))
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            debug!(target: "queueboard::hub", subscriber = %id, "Observer unsubscribed");
        }
        removed
    }

    /// Serialises the board once and pushes it to every observer, dropping
    /// observers whose receiving side is gone. Returns the number reached.
    pub fn notify(&mut self, board: &Board) -> serde_json::Result<usize> {
        let snapshot = Snapshot::encode(board)?;
        self.subscribers.retain(|id, tx| {
            let alive = tx.send(snapshot.clone()).is_ok();
            if !alive {
                debug!(target: "queueboard::hub", subscriber = %id, "Observer disconnected");
            }
            alive
        });
        self.last = Some(snapshot);
        Ok(self.subscribers.len())
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
