//! Base-interval bucket building from ticks.
//!
//! Folds ticks into fixed-width, epoch-aligned intervals. Boundaries are
//! detected from tick timestamps (event time), so a recorded tick sequence
//! always replays to the same buckets.

use flow_core::{align_to, Bucket, DurationMs, Error, Result, ShutdownPolicy, Tick, TimestampMs};
use tracing::{debug, trace};

use crate::tick_buffer::TickBuffer;

/// Lifecycle of the base interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalState {
    /// No tick or timer start seen yet.
    NoInterval,
    /// Accumulating ticks for `[start, end)`.
    Open {
        start: TimestampMs,
        end: TimestampMs,
    },
    /// Shut down; no further input accepted.
    Terminated,
}

/// Owns the tick buffer and closes base intervals on time boundaries.
pub struct BucketAggregator {
    /// Interval width.
    width_ms: DurationMs,
    /// Samples for the open interval.
    buffer: TickBuffer,
    /// Current lifecycle state.
    state: IntervalState,
    /// Timestamp of the last accepted tick.
    last_tick_ts: Option<TimestampMs>,
}

impl BucketAggregator {
    /// Create an aggregator for `width_ms` intervals.
    pub fn new(width_ms: DurationMs) -> Self {
        debug_assert!(width_ms > 0, "interval width must be positive");
        Self {
            width_ms,
            buffer: TickBuffer::new(),
            state: IntervalState::NoInterval,
            last_tick_ts: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IntervalState {
        self.state
    }

    /// Interval width.
    pub fn width_ms(&self) -> DurationMs {
        self.width_ms
    }

    /// Samples in the open interval.
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Open the interval containing `ts_ms` without a tick (timer start).
    ///
    /// No-op when an interval is already open.
    pub fn open_at(&mut self, ts_ms: TimestampMs) -> Result<()> {
        match self.state {
            IntervalState::Terminated => Err(Error::Terminated),
            IntervalState::Open { .. } => Ok(()),
            IntervalState::NoInterval => {
                let (start, end) = self
                    .interval_containing(ts_ms)
                    .ok_or(Error::TimestampOutOfRange(ts_ms))?;
                self.state = IntervalState::Open { start, end };
                Ok(())
            }
        }
    }

    /// Fold a tick into the open interval.
    ///
    /// Returns the buckets closed by this tick's timestamp, oldest first:
    /// empty when the tick lands in the open interval, one per elapsed
    /// interval otherwise (including empty buckets for skipped intervals).
    pub fn ingest(&mut self, tick: &Tick) -> Result<Vec<Bucket>> {
        if self.state == IntervalState::Terminated {
            return Err(Error::Terminated);
        }
        tick.validate()?;
        let Some((open_start, open_end)) = self.interval_containing(tick.ts_ms) else {
            return Err(Error::invalid_tick(tick.clone(), "timestamp out of range"));
        };

        if let Some(last) = self.last_tick_ts {
            if tick.ts_ms < last {
                return Err(Error::OutOfOrderTick {
                    tick: tick.clone(),
                    last_ts_ms: last,
                });
            }
        }
        if let IntervalState::Open { start, .. } = self.state {
            if tick.ts_ms < start {
                return Err(Error::OutOfOrderTick {
                    tick: tick.clone(),
                    last_ts_ms: start,
                });
            }
        }

        let closed = self.advance_to(tick.ts_ms);
        if self.state == IntervalState::NoInterval {
            self.state = IntervalState::Open {
                start: open_start,
                end: open_end,
            };
        }

        self.buffer.push(tick);
        self.last_tick_ts = Some(tick.ts_ms);
        trace!(ts_ms = tick.ts_ms, imbalance = tick.imbalance(), "tick ingested");

        Ok(closed)
    }

    /// Close every open interval whose end is at or before `ts_ms`.
    pub fn advance_to(&mut self, ts_ms: TimestampMs) -> Vec<Bucket> {
        let mut closed = Vec::new();
        loop {
            match self.state {
                IntervalState::Open { end, .. } if end <= ts_ms => match self.close() {
                    Some(bucket) => closed.push(bucket),
                    None => break,
                },
                _ => break,
            }
        }
        closed
    }

    /// Close the open interval and open the next one.
    ///
    /// Emits at most one bucket; `None` when no interval is open or the next
    /// interval would end past the timestamp range (state is left unchanged).
    pub fn close(&mut self) -> Option<Bucket> {
        let IntervalState::Open { start, end } = self.state else {
            return None;
        };
        let next_end = end.checked_add(self.width_ms)?;

        let bucket = self.buffer.summarize(start, end);
        self.buffer.clear();
        self.state = IntervalState::Open {
            start: end,
            end: next_end,
        };

        debug!(
            interval_start = bucket.interval_start,
            samples = bucket.sample_count,
            avg_imbalance = bucket.avg_imbalance,
            "base interval closed"
        );
        Some(bucket)
    }

    /// Terminate, applying the shutdown policy to the open interval.
    ///
    /// `FlushPartial` returns the open interval as a partial bucket (with its
    /// nominal end) when it holds samples. `Discard` drops it.
    pub fn shutdown(&mut self, policy: ShutdownPolicy) -> Option<Bucket> {
        let partial = match (self.state, policy) {
            (IntervalState::Open { start, end }, ShutdownPolicy::FlushPartial)
                if !self.buffer.is_empty() =>
            {
                Some(self.buffer.summarize(start, end))
            }
            _ => None,
        };

        if let IntervalState::Open { start, .. } = self.state {
            debug!(
                interval_start = start,
                samples = self.buffer.len(),
                flushed = partial.is_some(),
                "open interval at shutdown"
            );
        }

        self.buffer.clear();
        self.state = IntervalState::Terminated;
        partial
    }

    /// Bounds of the interval containing `ts_ms`, if its end is representable.
    fn interval_containing(&self, ts_ms: TimestampMs) -> Option<(TimestampMs, TimestampMs)> {
        let start = align_to(ts_ms, self.width_ms);
        Some((start, start.checked_add(self.width_ms)?))
    }
}
