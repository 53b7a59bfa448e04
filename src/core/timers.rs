//! Pending delayed transitions, ordered by fire time.
//!
//! The engine owns one [`TimerQueue`] and drains it from its own loop, so
//! timers never run concurrently with any other board mutation. Entries that
//! share a fire time fire in insertion order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::core::board::Stage;
use crate::core::message::Discipline;

/// A delayed move of one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub discipline: Discipline,
    pub id: String,
    /// The card must still be in this stage when the timer fires.
    pub from: Stage,
    pub to: Stage,
    /// Board epoch of the card when the timer was armed.
    pub epoch: u64,
}

#[derive(Debug)]
struct TimerEntry {
    fire_at: Instant,
    entry_id: u64,
    transition: Transition,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.entry_id == other.entry_id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.entry_id.cmp(&other.entry_id))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerStats {
    pub inserted: u64,
    pub fired: u64,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_entry_id: u64,
    stats: TimerStats,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `transition` to fire `delay` after `now`.
    pub fn schedule(&mut self, now: Instant, delay: Duration, transition: Transition) -> u64 {
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        trace!(
            target: "queueboard::timers",
            entry_id,
            id = %transition.id,
            to = %transition.to,
            delay_ms = delay.as_millis() as u64,
            "Arming transition"
        );
        self.heap.push(Reverse(TimerEntry {
            fire_at: now + delay,
            entry_id,
            transition,
        }));
        self.stats.inserted += 1;
        entry_id
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.fire_at)
    }

    /// Pops the earliest transition due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Transition> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.fire_at <= now => {}
            _ => return None,
        }
        let Reverse(entry) = self.heap.pop()?;
        self.stats.fired += 1;
        Some(entry.transition)
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }
}
