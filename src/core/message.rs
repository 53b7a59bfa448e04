use std::fmt;

use serde::{Deserialize, Serialize};

/// Message attribute carrying the simulated failure rate (0..=100).
pub const ATTR_FAILURE_RATE: &str = "FailureRate";
/// Message attribute carrying the producer-side creation time (RFC 3339).
pub const ATTR_TIMESTAMP: &str = "Timestamp";

/// Delivery discipline a message travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// At-least-once, unordered.
    Standard,
    /// Ordered per group, deduplicated.
    Fifo,
}

impl Discipline {
    pub const ALL: [Discipline; 2] = [Discipline::Standard, Discipline::Fifo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Discipline::Standard => "standard",
            Discipline::Fifo => "fifo",
        }
    }

    /// Prefix used in generated message bodies.
    pub fn body_prefix(&self) -> &'static str {
        match self {
            Discipline::Standard => "STD",
            Discipline::Fifo => "FIFO",
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked message on the board.
///
/// Created by a consumer loop from a provider delivery, then mutated only by
/// the lifecycle engine. The receipt handle never leaves the process: it is
/// skipped when the board is serialised for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCard {
    pub id: String,
    pub body: String,
    pub discipline: Discipline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<String>,
    pub failure_rate: u8,
    pub order: u64,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip)]
    pub receipt_handle: String,
}

impl MessageCard {
    /// Human readable description of a failed attempt.
    pub fn attempt_error(attempt: u32) -> String {
        format!("Processing failed (attempt {attempt})")
    }
}

/// Terminal error written on a card promoted to the dead-letter list.
pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// Parses the failure-rate attribute, clamping to 100 and defaulting to 0.
pub fn parse_failure_rate(raw: Option<&str>) -> u8 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.min(100.0) as u8)
        .unwrap_or(0)
}

pub fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_parsing() {
        assert_eq!(parse_failure_rate(Some("20")), 20);
        assert_eq!(parse_failure_rate(Some("250")), 100);
        assert_eq!(parse_failure_rate(Some("-5")), 0);
        assert_eq!(parse_failure_rate(Some("abc")), 0);
        assert_eq!(parse_failure_rate(None), 0);
    }

    #[test]
    fn receipt_handle_is_not_serialised() {
        let card = MessageCard {
            id: "m-1".into(),
            body: "STD-1-0".into(),
            discipline: Discipline::Standard,
            group_id: None,
            dedup_id: None,
            failure_rate: 0,
            order: 1,
            retry_count: 0,
            error: None,
            created_at: None,
            receipt_handle: "secret".into(),
        };
        let json = serde_json::to_string(&card).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"retryCount\":0"));
        assert!(!json.contains("groupId"));
    }
}
