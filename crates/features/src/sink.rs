//! Outbound bucket and signal events.
//!
//! The engine pushes finalized buckets and signals into an injected sink
//! instead of logging or persisting them itself.

use flow_core::{ts_to_datetime, Bucket, Result, Signal, TimestampMs};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    /// A finalized bucket for a timeframe.
    Bucket { timeframe: String, bucket: Bucket },
    /// An accumulation or distribution signal.
    Signal(Signal),
}

/// Receiver for finalized buckets and signals.
pub trait EventSink {
    /// Called once per finalized bucket, in emission order.
    fn on_bucket(&mut self, timeframe: &str, bucket: &Bucket) -> Result<()>;

    /// Called for each accumulation/distribution signal.
    fn on_signal(&mut self, signal: &Signal) -> Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded buckets for one timeframe, in order.
    pub fn buckets(&self, timeframe: &str) -> Vec<Bucket> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Bucket { timeframe: tf, bucket } if tf == timeframe => Some(*bucket),
                _ => None,
            })
            .collect()
    }

    /// Recorded signals, in order.
    pub fn signals(&self) -> Vec<&Signal> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Signal(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_bucket(&mut self, timeframe: &str, bucket: &Bucket) -> Result<()> {
        self.events.push(SinkEvent::Bucket {
            timeframe: timeframe.to_string(),
            bucket: *bucket,
        });
        Ok(())
    }

    fn on_signal(&mut self, signal: &Signal) -> Result<()> {
        self.events.push(SinkEvent::Signal(signal.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Logs every event through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

fn rfc3339(ts_ms: TimestampMs) -> String {
    ts_to_datetime(ts_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts_ms.to_string())
}

impl EventSink for TracingSink {
    fn on_bucket(&mut self, timeframe: &str, bucket: &Bucket) -> Result<()> {
        info!(
            timeframe,
            start = %rfc3339(bucket.interval_start),
            end = %rfc3339(bucket.interval_end),
            avg_imbalance = bucket.avg_imbalance,
            avg_bid_volume = bucket.avg_bid_volume,
            avg_ask_volume = bucket.avg_ask_volume,
            samples = bucket.sample_count,
            "bucket"
        );
        Ok(())
    }

    fn on_signal(&mut self, signal: &Signal) -> Result<()> {
        info!(
            timeframe = %signal.timeframe,
            at = %rfc3339(signal.ts_ms),
            kind = ?signal.kind,
            avg_imbalance = signal.metrics.avg_imbalance,
            bid_slope = signal.metrics.bid_volume_slope,
            ask_slope = signal.metrics.ask_volume_slope,
            samples = signal.metrics.total_samples,
            "signal"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
