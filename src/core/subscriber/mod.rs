//! Observers of the board.
//!
//! Provides the `SubscriberId`, the `Snapshot` payload pushed to observers and
//! the `BroadcastHub` that fans snapshots out.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod subscriber;

pub use registry::BroadcastHub;
pub use subscriber::{Snapshot, SubscriberId, Subscription};
