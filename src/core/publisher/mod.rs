//! Producer side: splits enqueue requests into provider batches.
#[allow(clippy::module_inception)]
pub mod publisher;

pub use publisher::{EnqueueOptions, EnqueueReceipt, Producer, MAX_ENQUEUE_COUNT};
