//! Per-interval tick accumulation.

use flow_core::{Bucket, Tick, TimestampMs};

/// Samples observed since the open base interval started.
#[derive(Debug, Clone, Default)]
pub struct TickBuffer {
    imbalances: Vec<f64>,
    bid_volumes: Vec<f64>,
    ask_volumes: Vec<f64>,
}

impl TickBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tick's imbalance and volumes.
    pub fn push(&mut self, tick: &Tick) {
        self.imbalances.push(tick.imbalance());
        self.bid_volumes.push(tick.bid_volume);
        self.ask_volumes.push(tick.ask_volume);
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.imbalances.len()
    }

    /// Whether no samples have been observed.
    pub fn is_empty(&self) -> bool {
        self.imbalances.is_empty()
    }

    /// Arithmetic means over the accumulated samples. Zeros when empty.
    pub fn summarize(&self, interval_start: TimestampMs, interval_end: TimestampMs) -> Bucket {
        if self.is_empty() {
            return Bucket::empty(interval_start, interval_end);
        }

        Bucket {
            interval_start,
            interval_end,
            avg_imbalance: mean(&self.imbalances),
            avg_bid_volume: mean(&self.bid_volumes),
            avg_ask_volume: mean(&self.ask_volumes),
            sample_count: self.len() as u64,
        }
    }

    /// Drop all samples, keeping allocations.
    pub fn clear(&mut self) {
        self.imbalances.clear();
        self.bid_volumes.clear();
        self.ask_volumes.clear();
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_means() {
        let mut buffer = TickBuffer::new();
        buffer.push(&Tick::new(0, 10.0, 5.0));
        buffer.push(&Tick::new(30_000, 8.0, 8.0));

        let bucket = buffer.summarize(0, 60_000);

        // imbalances: 5/15 and 0
        assert!((bucket.avg_imbalance - (1.0 / 3.0) / 2.0).abs() < 1e-10);
        assert!((bucket.avg_bid_volume - 9.0).abs() < 1e-10);
        assert!((bucket.avg_ask_volume - 6.5).abs() < 1e-10);
        assert_eq!(bucket.sample_count, 2);
    }

    #[test]
    fn test_empty_summary_is_neutral() {
        let buffer = TickBuffer::new();
        let bucket = buffer.summarize(60_000, 120_000);
        assert_eq!(bucket, Bucket::empty(60_000, 120_000));
    }

    #[test]
    fn test_clear() {
        let mut buffer = TickBuffer::new();
        buffer.push(&Tick::new(0, 1.0, 1.0));
        assert_eq!(buffer.len(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
