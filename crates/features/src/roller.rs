//! Timeframe rollup.
//!
//! Each coarser timeframe is built only from its immediately finer neighbour:
//! a stage collects `ratio` consecutive finer buckets and combines them into
//! one. Stages form an ordered list and a completed bucket is pushed forward
//! to the next stage, so a 15m bucket is always the roll-up of exactly three
//! 5m buckets, which are each the roll-up of exactly five 1m buckets.

use flow_core::{Bucket, DurationMs, Error, Result, Timeframe};
use tracing::{debug, warn};

/// Combine consecutive buckets into one spanning them.
///
/// Averages are weighted by sample count so empty buckets do not drag them
/// toward zero. When every bucket is empty the unweighted mean is used.
/// Returns `None` for an empty slice.
pub fn combine(buckets: &[Bucket]) -> Option<Bucket> {
    let first = buckets.first()?;
    let last = buckets.last()?;

    let sample_count: u64 = buckets.iter().map(|b| b.sample_count).sum();
    let (avg_imbalance, avg_bid_volume, avg_ask_volume) = if sample_count > 0 {
        let total = sample_count as f64;
        let weighted = |f: fn(&Bucket) -> f64| {
            buckets
                .iter()
                .map(|b| f(b) * b.sample_count as f64)
                .sum::<f64>()
                / total
        };
        (
            weighted(|b| b.avg_imbalance),
            weighted(|b| b.avg_bid_volume),
            weighted(|b| b.avg_ask_volume),
        )
    } else {
        let n = buckets.len() as f64;
        let unweighted = |f: fn(&Bucket) -> f64| buckets.iter().map(f).sum::<f64>() / n;
        (
            unweighted(|b| b.avg_imbalance),
            unweighted(|b| b.avg_bid_volume),
            unweighted(|b| b.avg_ask_volume),
        )
    };

    Some(Bucket {
        interval_start: first.interval_start,
        interval_end: last.interval_end,
        avg_imbalance,
        avg_bid_volume,
        avg_ask_volume,
        sample_count,
    })
}

/// Pending queue for one coarser timeframe.
#[derive(Debug, Clone)]
struct RollupStage {
    name: String,
    duration_ms: DurationMs,
    ratio: usize,
    pending: Vec<Bucket>,
}

impl RollupStage {
    fn accepts_first(&self, bucket: &Bucket) -> bool {
        bucket.interval_start.rem_euclid(self.duration_ms) == 0
    }

    /// Queue a finer bucket; returns the combined bucket once `ratio` are queued.
    fn accept(&mut self, bucket: Bucket) -> Result<Option<Bucket>> {
        match self.pending.last() {
            Some(last) if bucket.interval_start != last.interval_end => {
                let err = Error::out_of_order_bucket(
                    self.name.clone(),
                    last.interval_start,
                    bucket.interval_start,
                );
                warn!(timeframe = %self.name, error = %err, "non-contiguous bucket, pending rollup reset");
                self.pending.clear();
                return Err(err);
            }
            None if !self.accepts_first(&bucket) => {
                debug!(
                    timeframe = %self.name,
                    interval_start = bucket.interval_start,
                    "skipping bucket before first aligned boundary"
                );
                return Ok(None);
            }
            _ => {}
        }

        self.pending.push(bucket);
        if self.pending.len() < self.ratio {
            return Ok(None);
        }

        let rolled = combine(&self.pending);
        self.pending.clear();
        Ok(rolled)
    }
}

/// Chains finalized buckets up through every coarser timeframe.
#[derive(Debug, Clone)]
pub struct TimeframeRoller {
    /// Stage `i` builds timeframe `i + 1`.
    stages: Vec<RollupStage>,
}

impl TimeframeRoller {
    /// Build stages for every timeframe after the base.
    pub fn new(timeframes: &[Timeframe]) -> Self {
        let stages = timeframes
            .iter()
            .skip(1)
            .map(|tf| RollupStage {
                name: tf.name.clone(),
                duration_ms: tf.duration_ms,
                ratio: tf.ratio_to_base.max(1) as usize,
                pending: Vec::with_capacity(tf.ratio_to_base as usize),
            })
            .collect();
        Self { stages }
    }

    /// Feed a finalized base bucket.
    ///
    /// Returns every coarser bucket completed as a result, finest first,
    /// tagged with its timeframe index (1 = first coarser timeframe).
    pub fn push(&mut self, bucket: Bucket) -> Result<Vec<(usize, Bucket)>> {
        let mut emitted = Vec::new();
        let mut current = bucket;

        for (i, stage) in self.stages.iter_mut().enumerate() {
            match stage.accept(current)? {
                Some(rolled) => {
                    debug!(
                        timeframe = %stage.name,
                        interval_start = rolled.interval_start,
                        samples = rolled.sample_count,
                        "rolled up bucket"
                    );
                    emitted.push((i + 1, rolled));
                    current = rolled;
                }
                None => break,
            }
        }

        Ok(emitted)
    }

    /// Emit every non-empty pending queue as a partial bucket, finest first.
    ///
    /// Each partial bucket is also queued into the next stage before that
    /// stage is flushed.
    pub fn flush_partial(&mut self) -> Vec<(usize, Bucket)> {
        let mut emitted = Vec::new();

        for i in 0..self.stages.len() {
            let pending = std::mem::take(&mut self.stages[i].pending);
            let Some(rolled) = combine(&pending) else {
                continue;
            };
            emitted.push((i + 1, rolled));

            if let Some(next) = self.stages.get_mut(i + 1) {
                let fits = match next.pending.last() {
                    Some(last) => last.interval_end == rolled.interval_start,
                    None => next.accepts_first(&rolled),
                };
                if fits {
                    next.pending.push(rolled);
                }
            }
        }

        emitted
    }

    /// Queued buckets for timeframe index `timeframe` (None for the base or out of range).
    pub fn pending_len(&self, timeframe: usize) -> Option<usize> {
        let stage = timeframe.checked_sub(1)?;
        self.stages.get(stage).map(|s| s.pending.len())
    }

    /// Drop all pending queues.
    pub fn clear(&mut self) {
        for stage in &mut self.stages {
            stage.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn timeframes() -> Vec<Timeframe> {
        vec![
            Timeframe {
                name: "1m".into(),
                duration_ms: 60_000,
                ratio_to_base: 1,
                max_history_length: 60,
                lookback: 3,
            },
            Timeframe {
                name: "5m".into(),
                duration_ms: 300_000,
                ratio_to_base: 5,
                max_history_length: 12,
                lookback: 3,
            },
            Timeframe {
                name: "15m".into(),
                duration_ms: 900_000,
                ratio_to_base: 3,
                max_history_length: 4,
                lookback: 3,
            },
        ]
    }

    fn minute(i: i64, imbalance: f64, samples: u64) -> Bucket {
        Bucket {
            interval_start: i * 60_000,
            interval_end: (i + 1) * 60_000,
            avg_imbalance: imbalance,
            avg_bid_volume: 10.0 + i as f64,
            avg_ask_volume: 5.0,
            sample_count: samples,
        }
    }

    #[test]
    fn test_combine_weighted() {
        let buckets = [minute(0, 0.5, 3), minute(1, -0.5, 1)];
        let rolled = combine(&buckets).unwrap();

        // (0.5*3 - 0.5*1) / 4
        assert_abs_diff_eq!(rolled.avg_imbalance, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(rolled.avg_bid_volume, (10.0 * 3.0 + 11.0) / 4.0, epsilon = 1e-12);
        assert_eq!(rolled.sample_count, 4);
        assert_eq!(rolled.interval_start, 0);
        assert_eq!(rolled.interval_end, 120_000);
    }

    #[test]
    fn test_combine_ignores_empty_weights() {
        let buckets = [minute(0, 0.4, 2), Bucket::empty(60_000, 120_000)];
        let rolled = combine(&buckets).unwrap();
        assert_abs_diff_eq!(rolled.avg_imbalance, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_combine_all_empty_falls_back_to_unweighted() {
        let mut a = Bucket::empty(0, 60_000);
        let mut b = Bucket::empty(60_000, 120_000);
        a.avg_imbalance = 0.2;
        b.avg_imbalance = 0.4;

        let rolled = combine(&[a, b]).unwrap();
        assert_abs_diff_eq!(rolled.avg_imbalance, 0.3, epsilon = 1e-12);
        assert_eq!(rolled.sample_count, 0);
        assert!(combine(&[]).is_none());
    }

    #[test]
    fn test_five_minute_rollup() {
        let mut roller = TimeframeRoller::new(&timeframes());
        let imbalances = [0.2, 0.0, 0.0, 0.6, 0.4];

        let mut emitted = Vec::new();
        for (i, imb) in imbalances.iter().enumerate() {
            emitted.extend(roller.push(minute(i as i64, *imb, 2)).unwrap());
        }

        assert_eq!(emitted.len(), 1);
        let (tf, rolled) = emitted[0];
        assert_eq!(tf, 1);
        assert_abs_diff_eq!(rolled.avg_imbalance, 0.24, epsilon = 1e-12);
        assert_eq!(rolled.sample_count, 10);
        assert_eq!(rolled.interval_end, 300_000);
        assert_eq!(roller.pending_len(1), Some(0));
        assert_eq!(roller.pending_len(2), Some(1));
    }

    #[test]
    fn test_chain_reaches_fifteen_minutes() {
        let mut roller = TimeframeRoller::new(&timeframes());

        let mut emitted = Vec::new();
        for i in 0..15 {
            emitted.extend(roller.push(minute(i, 0.1 * (i % 3) as f64, 1 + i as u64)).unwrap());
        }

        let fives: Vec<Bucket> = emitted.iter().filter(|(tf, _)| *tf == 1).map(|(_, b)| *b).collect();
        let fifteens: Vec<Bucket> = emitted.iter().filter(|(tf, _)| *tf == 2).map(|(_, b)| *b).collect();
        assert_eq!(fives.len(), 3);
        assert_eq!(fifteens.len(), 1);

        // The 15m bucket equals the roll-up of its three 5m buckets.
        let expected = combine(&fives).unwrap();
        assert_eq!(fifteens[0].sample_count, expected.sample_count);
        assert_abs_diff_eq!(fifteens[0].avg_imbalance, expected.avg_imbalance, epsilon = 1e-12);
        assert_eq!(fifteens[0].interval_start, 0);
        assert_eq!(fifteens[0].interval_end, 900_000);
    }

    #[test]
    fn test_unaligned_warmup_skipped() {
        let mut roller = TimeframeRoller::new(&timeframes());

        // Minutes 3 and 4 precede the first 5m boundary.
        assert!(roller.push(minute(3, 0.9, 1)).unwrap().is_empty());
        assert!(roller.push(minute(4, 0.9, 1)).unwrap().is_empty());
        assert_eq!(roller.pending_len(1), Some(0));

        let mut emitted = Vec::new();
        for i in 5..10 {
            emitted.extend(roller.push(minute(i, 0.1, 1)).unwrap());
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].1.interval_start, 300_000);
        assert_abs_diff_eq!(emitted[0].1.avg_imbalance, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_gap_rejected_and_reset() {
        let mut roller = TimeframeRoller::new(&timeframes());
        roller.push(minute(0, 0.1, 1)).unwrap();

        let err = roller.push(minute(2, 0.1, 1)).unwrap_err();
        assert!(matches!(err, Error::OutOfOrderBucket { .. }));
        assert_eq!(roller.pending_len(1), Some(0));
    }

    #[test]
    fn test_flush_partial() {
        let mut roller = TimeframeRoller::new(&timeframes());
        for i in 0..7 {
            roller.push(minute(i, 0.2, 1)).unwrap();
        }

        let flushed = roller.flush_partial();

        // 5m partial (minutes 5..7), then 15m partial (0..7).
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].0, 1);
        assert_eq!(flushed[0].1.interval_start, 300_000);
        assert_eq!(flushed[0].1.sample_count, 2);
        assert_eq!(flushed[1].0, 2);
        assert_eq!(flushed[1].1.interval_start, 0);
        assert_eq!(flushed[1].1.interval_end, 420_000);
        assert_eq!(flushed[1].1.sample_count, 7);
    }

    #[test]
    fn test_single_timeframe_has_no_stages() {
        let tfs = timeframes();
        let mut roller = TimeframeRoller::new(&tfs[..1]);
        assert!(roller.push(minute(0, 0.1, 1)).unwrap().is_empty());
        assert!(roller.flush_partial().is_empty());
        assert_eq!(roller.pending_len(1), None);
    }
}
