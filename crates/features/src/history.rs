//! Bounded per-timeframe bucket history.

use std::collections::VecDeque;

use flow_core::{Bucket, Error, Result};

/// Finalized buckets for one timeframe, oldest first, at most `max_len` long.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    /// Timeframe name, for error reporting.
    timeframe: String,
    /// Retained buckets ordered by interval_start.
    buckets: VecDeque<Bucket>,
    /// Retention cap.
    max_len: usize,
}

impl HistoryStore {
    /// Create an empty store retaining at most `max_len` buckets.
    pub fn new(timeframe: impl Into<String>, max_len: usize) -> Self {
        Self {
            timeframe: timeframe.into(),
            buckets: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Append at the tail, evicting from the head past the cap.
    ///
    /// Rejects a bucket that does not start strictly after the current tail.
    pub fn append(&mut self, bucket: Bucket) -> Result<()> {
        if let Some(last) = self.buckets.back() {
            if bucket.interval_start <= last.interval_start {
                return Err(Error::out_of_order_bucket(
                    self.timeframe.clone(),
                    last.interval_start,
                    bucket.interval_start,
                ));
            }
        }

        self.buckets.push_back(bucket);
        while self.buckets.len() > self.max_len {
            self.buckets.pop_front();
        }
        Ok(())
    }

    /// Snapshot of the newest `n` buckets (fewer if history is shorter), oldest first.
    pub fn window(&self, n: usize) -> Vec<Bucket> {
        let skip = self.buckets.len().saturating_sub(n);
        self.buckets.range(skip..).copied().collect()
    }

    /// Most recent bucket.
    pub fn latest(&self) -> Option<&Bucket> {
        self.buckets.back()
    }

    /// Iterate over all retained buckets, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Bucket> + ExactSizeIterator {
        self.buckets.iter()
    }

    /// Number of retained buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Timeframe name.
    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }
}
