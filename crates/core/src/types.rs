//! Core data types for the flow-imbalance system.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Duration in milliseconds.
pub type DurationMs = i64;

/// Price type with ordering support.
pub type Price = OrderedFloat<f64>;

/// Size/quantity type.
pub type Size = f64;

/// Align a timestamp down to a multiple of `width_ms` since the epoch.
#[inline]
pub fn align_to(ts_ms: TimestampMs, width_ms: DurationMs) -> TimestampMs {
    ts_ms - ts_ms.rem_euclid(width_ms)
}

/// Convert a timestamp to a UTC datetime, if it is representable.
pub fn ts_to_datetime(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
}

/// A single order-book observation: resting volume on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Resting bid volume.
    pub bid_volume: Size,
    /// Resting ask volume.
    pub ask_volume: Size,
}

impl Tick {
    /// Create a new tick.
    pub fn new(ts_ms: TimestampMs, bid_volume: Size, ask_volume: Size) -> Self {
        Self {
            ts_ms,
            bid_volume,
            ask_volume,
        }
    }

    /// Order-flow imbalance: (bid - ask) / (bid + ask), neutral 0 on an empty book.
    #[inline]
    pub fn imbalance(&self) -> f64 {
        let total = self.bid_volume + self.ask_volume;
        if total > 0.0 {
            (self.bid_volume - self.ask_volume) / total
        } else {
            0.0
        }
    }

    /// Reject negative or non-finite volumes.
    pub fn validate(&self) -> Result<()> {
        if !self.bid_volume.is_finite() || !self.ask_volume.is_finite() {
            return Err(Error::invalid_tick(self.clone(), "non-finite volume"));
        }
        if self.bid_volume < 0.0 {
            return Err(Error::invalid_tick(self.clone(), "negative bid volume"));
        }
        if self.ask_volume < 0.0 {
            return Err(Error::invalid_tick(self.clone(), "negative ask volume"));
        }
        Ok(())
    }
}

/// Finalized summary of one closed interval on one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Inclusive interval start (ms).
    pub interval_start: TimestampMs,
    /// Exclusive interval end (ms).
    pub interval_end: TimestampMs,
    /// Mean imbalance over the interval.
    pub avg_imbalance: f64,
    /// Mean bid volume over the interval.
    pub avg_bid_volume: Size,
    /// Mean ask volume over the interval.
    pub avg_ask_volume: Size,
    /// Number of ticks observed.
    pub sample_count: u64,
}

impl Bucket {
    /// An interval with no observations, carrying neutral values.
    pub fn empty(interval_start: TimestampMs, interval_end: TimestampMs) -> Self {
        Self {
            interval_start,
            interval_end,
            avg_imbalance: 0.0,
            avg_bid_volume: 0.0,
            avg_ask_volume: 0.0,
            sample_count: 0,
        }
    }

    /// Whether no ticks were observed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Interval width in milliseconds.
    #[inline]
    pub fn duration_ms(&self) -> DurationMs {
        self.interval_end - self.interval_start
    }

    /// Bid/ask volume ratio, 1.0 when there is no ask volume.
    #[inline]
    pub fn volume_ratio(&self) -> f64 {
        if self.avg_ask_volume > 0.0 {
            self.avg_bid_volume / self.avg_ask_volume
        } else {
            1.0
        }
    }
}

/// A validated timeframe definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeframe {
    /// Display name (e.g., "5m").
    pub name: String,
    /// Bucket width in milliseconds.
    pub duration_ms: DurationMs,
    /// Number of immediately-finer buckets per bucket of this timeframe (1 for the base).
    pub ratio_to_base: u32,
    /// Maximum number of retained buckets.
    pub max_history_length: usize,
    /// Detector lookback in buckets.
    pub lookback: usize,
}

/// Pattern classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Sustained bid-side pressure with building bid volume.
    Accumulation,
    /// Sustained ask-side pressure with building ask volume.
    Distribution,
    /// No pattern.
    None,
}

impl SignalKind {
    /// Is this an actionable pattern?
    pub fn is_pattern(self) -> bool {
        !matches!(self, SignalKind::None)
    }
}

/// Why an evaluation produced `SignalKind::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSignalReason {
    /// Fewer buckets than the lookback.
    InsufficientHistory,
    /// Total samples below the minimum.
    InsufficientSamples,
    /// Too many empty buckets in the window.
    SparseWindow,
    /// Average imbalance inside the neutral band.
    BelowThreshold,
    /// Imbalance past threshold but volume trend not confirming.
    TrendNotConfirmed,
}

/// Metrics backing a classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    /// Buckets in the evaluated window.
    pub window_len: usize,
    /// Unweighted mean of bucket imbalances.
    pub avg_imbalance: f64,
    /// Least-squares bid volume slope per bucket.
    pub bid_volume_slope: f64,
    /// Least-squares ask volume slope per bucket.
    pub ask_volume_slope: f64,
    /// Sum of sample counts.
    pub total_samples: u64,
    /// Buckets with no samples.
    pub empty_buckets: usize,
}

/// Result of evaluating one timeframe's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Timeframe name.
    pub timeframe: String,
    /// interval_end of the newest bucket in the window (0 without history).
    pub ts_ms: TimestampMs,
    /// Classification.
    pub kind: SignalKind,
    /// Supporting metrics.
    pub metrics: SignalMetrics,
    /// Set when `kind` is `None`.
    pub reason: Option<NoSignalReason>,
}

/// Direction of imbalance drift over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

/// Short-horizon trend readout for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// Timeframe name.
    pub timeframe: String,
    /// Direction of imbalance drift.
    pub direction: TrendDirection,
    /// Imbalance of the newest bucket.
    pub current_imbalance: f64,
    /// Change in imbalance from the previous bucket.
    pub imbalance_speed: f64,
    /// Bid/ask volume ratio of the newest bucket.
    pub volume_ratio: f64,
}

/// Incremental depth update: (price, quantity) levels, quantity 0 removes a level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// Timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Bid levels.
    #[serde(default)]
    pub bids: Vec<(f64, Size)>,
    /// Ask levels.
    #[serde(default)]
    pub asks: Vec<(f64, Size)>,
}
