//! Replay summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flow_core::{ts_to_datetime, Signal, TimestampMs, TrendDirection};
use flow_ingestion::LargeOrders;
use serde::{Deserialize, Serialize};

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Instrument symbol from configuration.
    pub symbol: String,
    pub ticks_ingested: u64,
    pub ticks_rejected: u64,
    /// First accepted tick.
    pub first_tick: Option<DateTime<Utc>>,
    /// Last accepted tick.
    pub last_tick: Option<DateTime<Utc>>,
    /// Buckets emitted per timeframe.
    pub buckets_emitted: BTreeMap<String, u64>,
    pub accumulation_signals: u64,
    pub distribution_signals: u64,
    /// Detector result per timeframe at end of stream, base first.
    pub final_signals: Vec<Signal>,
    /// Direction shared by all timeframes at end of stream.
    pub confluence: Option<TrendDirection>,
    /// Large resting levels in the final book, for sources that keep one.
    pub large_orders: Option<LargeOrders>,
    /// Stopped before the source was exhausted.
    pub interrupted: bool,
}

impl ReplayReport {
    /// Total buckets across all timeframes.
    pub fn total_buckets(&self) -> u64 {
        self.buckets_emitted.values().sum()
    }

    /// Wall-clock span covered by accepted ticks, in milliseconds.
    pub fn span_ms(&self) -> Option<TimestampMs> {
        Some((self.last_tick? - self.first_tick?).num_milliseconds())
    }

    pub(crate) fn set_tick_range(&mut self, first: Option<TimestampMs>, last: Option<TimestampMs>) {
        self.first_tick = first.and_then(ts_to_datetime);
        self.last_tick = last.and_then(ts_to_datetime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_and_totals() {
        let mut report = ReplayReport::default();
        assert_eq!(report.span_ms(), None);

        report.set_tick_range(Some(1_000), Some(61_000));
        report.buckets_emitted.insert("1m".into(), 3);
        report.buckets_emitted.insert("5m".into(), 1);

        assert_eq!(report.span_ms(), Some(60_000));
        assert_eq!(report.total_buckets(), 4);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["first_tick"], "1970-01-01T00:00:01Z");
    }
}
