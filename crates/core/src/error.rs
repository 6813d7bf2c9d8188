//! Error types for the flow-imbalance system.

use crate::types::{Tick, TimestampMs};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the flow-imbalance system.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (inconsistent timeframes or thresholds).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tick rejected at ingestion. Carries the raw tick.
    #[error("Invalid tick at {}: {reason}", tick.ts_ms)]
    InvalidTick {
        /// The tick that triggered the failure.
        tick: Tick,
        /// What was wrong with it.
        reason: String,
    },

    /// Tick timestamp earlier than the last accepted tick.
    #[error("Out-of-order tick: ts {} precedes last accepted ts {last_ts_ms}", tick.ts_ms)]
    OutOfOrderTick {
        /// The tick that triggered the failure.
        tick: Tick,
        /// Timestamp of the last accepted tick.
        last_ts_ms: TimestampMs,
    },

    /// Bucket does not follow the previous one for its timeframe.
    #[error("Out-of-order bucket on {timeframe}: start {got_start_ms} after {last_start_ms}")]
    OutOfOrderBucket {
        /// Timeframe name.
        timeframe: String,
        /// interval_start of the last accepted bucket.
        last_start_ms: TimestampMs,
        /// interval_start of the rejected bucket.
        got_start_ms: TimestampMs,
    },

    /// Timer timestamp whose interval cannot be represented.
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(TimestampMs),

    /// Lookup by an unconfigured timeframe name.
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    /// The pipeline has been shut down and accepts no more input.
    #[error("Aggregation pipeline has been shut down")]
    Terminated,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an invalid tick error.
    pub fn invalid_tick(tick: Tick, reason: impl Into<String>) -> Self {
        Error::InvalidTick {
            tick,
            reason: reason.into(),
        }
    }

    /// Create an out-of-order bucket error.
    pub fn out_of_order_bucket(
        timeframe: impl Into<String>,
        last_start_ms: TimestampMs,
        got_start_ms: TimestampMs,
    ) -> Self {
        Error::OutOfOrderBucket {
            timeframe: timeframe.into(),
            last_start_ms,
            got_start_ms,
        }
    }

    /// Data-quality failures that reject a single input without stalling the
    /// pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidTick { .. }
                | Error::OutOfOrderTick { .. }
                | Error::OutOfOrderBucket { .. }
                | Error::TimestampOutOfRange(_)
        )
    }

    /// The raw tick behind a rejection, if any.
    pub fn tick(&self) -> Option<&Tick> {
        match self {
            Error::InvalidTick { tick, .. } | Error::OutOfOrderTick { tick, .. } => Some(tick),
            _ => None,
        }
    }
}
