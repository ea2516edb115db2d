use chrono::{DateTime, Utc};
use thiserror::Error;

/// An event could not be evaluated at all.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("event {container_id}#{sequence}: fields must be a mapping")]
    MalformedFields { container_id: String, sequence: u64 },

    #[error("event {container_id}#{sequence}: timestamp {timestamp} is more than {max_skew_secs}s ahead of the local clock")]
    FutureTimestamp {
        container_id: String,
        sequence: u64,
        timestamp: DateTime<Utc>,
        max_skew_secs: i64,
    },
}

/// The tracked-key bound was reached and the least recently used key was
/// evicted to make room. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("correlation state for rule '{rule_id}' key '{key}' evicted (capacity {capacity})")]
pub struct CorrelationOverflow {
    pub rule_id: String,
    pub key: String,
    pub capacity: usize,
}

/// A lane refused an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaneError {
    #[error("event lane {lane} is full")]
    Full { lane: usize },

    #[error("event lane {lane} is closed")]
    Closed { lane: usize },
}
