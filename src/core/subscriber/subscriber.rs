use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use futures::Stream;

use crate::core::board::Board;

/// Unique identifier for an observer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        SubscriberId(s.to_owned())
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        SubscriberId(s)
    }
}

impl AsRef<str> for SubscriberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for SubscriberId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The whole board serialised once and shared by every observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Arc<str>);

impl Snapshot {
    pub fn encode(board: &Board) -> serde_json::Result<Self> {
        Ok(Snapshot(serde_json::to_string(board)?.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the snapshot back into a board with a rebuilt id index.
    pub fn decode(&self) -> serde_json::Result<Board> {
        let mut board: Board = serde_json::from_str(&self.0)?;
        board.reindex();
        Ok(board)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live feed of board snapshots.
///
/// The first snapshot is queued at subscribe time; one more arrives per board
/// mutation. Dropping the subscription unregisters it on the next broadcast.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: flume::Receiver<Snapshot>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, receiver: flume::Receiver<Snapshot>) -> Self {
        Self { id, receiver }
    }

    #[inline(always)]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Waits for the next snapshot; `None` once the hub has dropped us.
    pub async fn recv(&self) -> Option<Snapshot> {
        self.receiver.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }

    /// Drains every snapshot queued so far.
    pub fn drain(&self) -> Vec<Snapshot> {
        self.receiver.try_iter().collect()
    }

    pub fn into_stream(self) -> impl Stream<Item = Snapshot> {
        self.receiver.into_stream()
    }
}
