//! Retry bookkeeping and the simulated processing outcome.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::util::backoff;

/// Attempts counted per message id, kept apart from the board lists.
#[derive(Debug, Default)]
pub struct RetryRegistry {
    attempts: HashMap<String, u32>,
}

impl RetryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the counter for a freshly ingested message. Existing counters are
    /// never lowered.
    pub fn seed(&mut self, id: &str, attempts: u32) {
        if attempts == 0 {
            return;
        }
        let entry = self.attempts.entry(id.to_owned()).or_insert(0);
        *entry = (*entry).max(attempts);
    }

    /// Records one more failed attempt and returns the new total.
    pub fn record_failure(&mut self, id: &str) -> u32 {
        let entry = self.attempts.entry(id.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    pub fn clear(&mut self, id: &str) {
        self.attempts.remove(id);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// What happens to a card right after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `received` after the delay.
    Retry { after: Duration },
    /// To `dlq` after the delay.
    DeadLetter { after: Duration },
}

/// Delays and limits of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    pub processing_delay: Duration,
    pub done_delay: Duration,
    pub dlq_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            processing_delay: Duration::from_secs(1),
            done_delay: Duration::from_secs(3),
            dlq_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// `attempts` is the failure count including the one just recorded.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            RetryDecision::DeadLetter {
                after: self.dlq_delay,
            }
        } else {
            RetryDecision::Retry {
                after: backoff::exponential(self.backoff_unit, attempts),
            }
        }
    }
}

/// Draws the simulated outcome of one processing attempt.
#[derive(Debug)]
pub struct FailureSimulator {
    rng: StdRng,
}

impl FailureSimulator {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fails with probability `failure_rate / 100`, independently per call.
    pub fn should_fail(&mut self, failure_rate: u8) -> bool {
        match failure_rate {
            0 => false,
            r if r >= 100 => true,
            r => self.rng.gen_range(0..100u8) < r,
        }
    }
}
