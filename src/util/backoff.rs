//! Backoff helpers shared by the retry scheduler and the consumer loops.
//!
//! Delays are expressed as multiples of a configurable time unit so the same
//! policy runs at human speed on the dashboard and at any speed in tests.

use std::time::Duration;

/// Exponent used for the consumer's error backoff (`unit * 2^5`).
const POLL_ERROR_EXPONENT: u32 = 5;

/// `unit * 2^exponent`, saturating instead of overflowing.
pub fn exponential(unit: Duration, exponent: u32) -> Duration {
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

/// Exponential backoff clamped to `cap`.
pub fn capped(unit: Duration, exponent: u32, cap: Duration) -> Duration {
    exponential(unit, exponent).min(cap)
}

/// Fixed delay a consumer loop waits after a failed poll.
pub fn poll_error_delay(unit: Duration, cap: Duration) -> Duration {
    capped(unit, POLL_ERROR_EXPONENT, cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let unit = Duration::from_secs(1);
        assert_eq!(exponential(unit, 1), Duration::from_secs(2));
        assert_eq!(exponential(unit, 2), Duration::from_secs(4));
        assert_eq!(exponential(unit, 0), unit);
    }

    #[test]
    fn huge_exponent_saturates() {
        let unit = Duration::from_secs(1);
        assert_eq!(exponential(unit, 64), unit.saturating_mul(u32::MAX));
    }

    #[test]
    fn poll_error_delay_is_capped() {
        let unit = Duration::from_secs(1);
        assert_eq!(poll_error_delay(unit, Duration::from_secs(30)), Duration::from_secs(30));
        assert_eq!(
            poll_error_delay(Duration::from_millis(10), Duration::from_secs(30)),
            Duration::from_millis(320)
        );
    }
}
