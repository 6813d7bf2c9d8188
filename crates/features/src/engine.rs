//! Flow engine.
//!
//! Wires the base aggregator, the timeframe roller, per-timeframe history and
//! the pattern detector into one single-writer pipeline.

use std::collections::BTreeMap;

use flow_core::{
    Bucket, Config, Error, Result, ShutdownPolicy, Signal, SignalKind, Tick, Timeframe,
    TimestampMs, TrendDirection, TrendSummary,
};
use flow_ingestion::{BucketAggregator, IntervalState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    detector::PatternDetector,
    history::HistoryStore,
    roller::TimeframeRoller,
    sink::{EventSink, SinkEvent},
    trend,
};

/// Counters over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub ticks_ingested: u64,
    pub ticks_rejected: u64,
    /// Buckets emitted per timeframe name.
    pub buckets_emitted: BTreeMap<String, u64>,
    pub accumulation_signals: u64,
    pub distribution_signals: u64,
}

/// Multi-timeframe order-flow imbalance engine.
///
/// Ticks must arrive in non-decreasing timestamp order from a single caller.
/// Bucket closes, rollups and signal evaluation complete synchronously before
/// `ingest` returns.
pub struct FlowEngine {
    /// Validated timeframes, base first.
    timeframes: Vec<Timeframe>,
    /// Base interval state machine.
    aggregator: BucketAggregator,
    /// Coarser timeframe stages.
    roller: TimeframeRoller,
    /// One history per timeframe, same order as `timeframes`.
    histories: Vec<HistoryStore>,
    detector: PatternDetector,
    shutdown_policy: ShutdownPolicy,
    stats: EngineStats,
}

impl FlowEngine {
    /// Validate configuration and build an engine with empty state.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let timeframes = config.timeframes();
        let base = timeframes
            .first()
            .ok_or_else(|| Error::config("at least one timeframe is required"))?;

        let aggregator = BucketAggregator::new(base.duration_ms);
        let roller = TimeframeRoller::new(&timeframes);
        let histories = timeframes
            .iter()
            .map(|tf| HistoryStore::new(tf.name.clone(), tf.max_history_length))
            .collect();

        info!(
            symbol = %config.instrument.symbol,
            timeframes = ?timeframes.iter().map(|tf| tf.name.as_str()).collect::<Vec<_>>(),
            shutdown = ?config.shutdown,
            "flow engine configured"
        );

        Ok(Self {
            timeframes,
            aggregator,
            roller,
            histories,
            detector: PatternDetector::new(config.detector.clone()),
            shutdown_policy: config.shutdown,
            stats: EngineStats::default(),
        })
    }

    /// Ingest one tick, emitting any buckets and signals it finalizes.
    ///
    /// Rejected ticks leave the engine unchanged and are returned as errors
    /// carrying the raw tick.
    pub fn ingest<S: EventSink + ?Sized>(&mut self, tick: &Tick, sink: &mut S) -> Result<()> {
        let closed = match self.aggregator.ingest(tick) {
            Ok(closed) => closed,
            Err(err) => {
                if err.is_recoverable() {
                    self.stats.ticks_rejected += 1;
                    warn!(
                        ts_ms = tick.ts_ms,
                        bid_volume = tick.bid_volume,
                        ask_volume = tick.ask_volume,
                        error = %err,
                        "tick rejected"
                    );
                }
                return Err(err);
            }
        };

        self.stats.ticks_ingested += 1;
        self.finalize_base(closed, sink)
    }

    /// Close every base interval ending at or before `ts_ms` without a tick.
    ///
    /// Before the first tick this opens the interval containing `ts_ms`.
    pub fn advance_to<S: EventSink + ?Sized>(
        &mut self,
        ts_ms: TimestampMs,
        sink: &mut S,
    ) -> Result<()> {
        match self.aggregator.state() {
            IntervalState::Terminated => Err(Error::Terminated),
            IntervalState::NoInterval => self.aggregator.open_at(ts_ms),
            IntervalState::Open { .. } => {
                let closed = self.aggregator.advance_to(ts_ms);
                self.finalize_base(closed, sink)
            }
        }
    }

    /// Evaluate the detector for one timeframe.
    pub fn evaluate(&self, timeframe: &str) -> Result<Signal> {
        let idx = self.index_of(timeframe)?;
        Ok(self
            .detector
            .evaluate(&self.histories[idx], self.timeframes[idx].lookback))
    }

    /// Retained history for one timeframe.
    pub fn history(&self, timeframe: &str) -> Result<&HistoryStore> {
        let idx = self.index_of(timeframe)?;
        Ok(&self.histories[idx])
    }

    /// Imbalance trend over the timeframe's lookback (at least two buckets).
    pub fn trend(&self, timeframe: &str) -> Result<Option<TrendSummary>> {
        let idx = self.index_of(timeframe)?;
        let tf = &self.timeframes[idx];
        let window = self.histories[idx].window(tf.lookback.max(2));
        Ok(trend::summarize(
            &tf.name,
            &window,
            self.detector.config().trend_threshold,
        ))
    }

    /// Direction shared by every timeframe's trend, if all agree.
    pub fn confluence(&self) -> Option<TrendDirection> {
        let summaries = self
            .timeframes
            .iter()
            .map(|tf| self.trend(&tf.name).ok().flatten())
            .collect::<Option<Vec<_>>>()?;
        trend::confluence(&summaries)
    }

    /// Terminate, applying the configured shutdown policy.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.is_terminated() {
            return Ok(());
        }

        let partial = self.aggregator.shutdown(self.shutdown_policy);
        match self.shutdown_policy {
            ShutdownPolicy::Discard => self.roller.clear(),
            ShutdownPolicy::FlushPartial => {
                if let Some(bucket) = partial {
                    self.finalize_base(vec![bucket], sink)?;
                }
                let mut events = Vec::new();
                for (idx, bucket) in self.roller.flush_partial() {
                    self.publish(idx, bucket, &mut events);
                }
                deliver(&events, sink)?;
            }
        }

        info!(
            policy = ?self.shutdown_policy,
            ticks = self.stats.ticks_ingested,
            rejected = self.stats.ticks_rejected,
            "flow engine shut down"
        );
        sink.flush()
    }

    /// Whether `shutdown` has run.
    pub fn is_terminated(&self) -> bool {
        self.aggregator.state() == IntervalState::Terminated
    }

    /// Base interval state.
    pub fn state(&self) -> IntervalState {
        self.aggregator.state()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Configured timeframes, base first.
    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    fn index_of(&self, timeframe: &str) -> Result<usize> {
        self.timeframes
            .iter()
            .position(|tf| tf.name == timeframe)
            .ok_or_else(|| Error::UnknownTimeframe(timeframe.to_string()))
    }

    /// Publish base buckets and everything they roll up into.
    ///
    /// History and rollup state take every bucket before the sink sees any,
    /// so a failing sink cannot leave gaps.
    fn finalize_base<S: EventSink + ?Sized>(
        &mut self,
        buckets: Vec<Bucket>,
        sink: &mut S,
    ) -> Result<()> {
        let mut events = Vec::new();
        for bucket in buckets {
            self.publish(0, bucket, &mut events);
            match self.roller.push(bucket) {
                Ok(rolled) => {
                    for (idx, coarse) in rolled {
                        self.publish(idx, coarse, &mut events);
                    }
                }
                // Roller resets itself and logs; aggregation continues.
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "rollup skipped");
                }
                Err(err) => {
                    deliver(&events, sink)?;
                    return Err(err);
                }
            }
        }
        deliver(&events, sink)
    }

    /// Append to history and evaluate the timeframe, queueing sink events.
    fn publish(&mut self, idx: usize, bucket: Bucket, events: &mut Vec<SinkEvent>) {
        let tf = &self.timeframes[idx];
        if let Err(err) = self.histories[idx].append(bucket) {
            warn!(timeframe = %tf.name, error = %err, "bucket rejected by history");
            return;
        }

        *self
            .stats
            .buckets_emitted
            .entry(tf.name.clone())
            .or_default() += 1;
        events.push(SinkEvent::Bucket {
            timeframe: tf.name.clone(),
            bucket,
        });

        let signal = self.detector.evaluate(&self.histories[idx], tf.lookback);
        match signal.kind {
            SignalKind::Accumulation => self.stats.accumulation_signals += 1,
            SignalKind::Distribution => self.stats.distribution_signals += 1,
            SignalKind::None => return,
        }

        info!(
            timeframe = %signal.timeframe,
            kind = ?signal.kind,
            ts_ms = signal.ts_ms,
            avg_imbalance = signal.metrics.avg_imbalance,
            "pattern detected"
        );
        events.push(SinkEvent::Signal(signal));
    }
}

/// Hand events to the sink in order.
///
/// On the first failure the undelivered tail is logged with its interval
/// range and dropped.
fn deliver<S: EventSink + ?Sized>(events: &[SinkEvent], sink: &mut S) -> Result<()> {
    for (i, event) in events.iter().enumerate() {
        let sent = match event {
            SinkEvent::Bucket { timeframe, bucket } => sink.on_bucket(timeframe, bucket),
            SinkEvent::Signal(signal) => sink.on_signal(signal),
        };
        if let Err(err) = sent {
            let dropped = &events[i..];
            let intervals = dropped.iter().filter_map(|e| match e {
                SinkEvent::Bucket { bucket, .. } => Some((bucket.interval_start, bucket.interval_end)),
                SinkEvent::Signal(_) => None,
            });
            let from_ms = intervals.clone().map(|(start, _)| start).min();
            let to_ms = intervals.map(|(_, end)| end).max();
            warn!(
                sink = sink.name(),
                dropped = dropped.len(),
                from_ms = ?from_ms,
                to_ms = ?to_ms,
                error = %err,
                "sink failed, events dropped"
            );
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use approx::assert_abs_diff_eq;
    use flow_core::TimeframeConfig;

    fn config() -> Config {
        let mut config = Config::default();
        config.timeframes = vec![
            TimeframeConfig::new("1m", 60_000, 1, 60),
            TimeframeConfig::new("5m", 300_000, 5, 12),
        ];
        config
    }

    /// Ticks with a fixed imbalance: bid/ask chosen so (b - a) / (b + a) = imbalance.
    fn tick(ts_ms: i64, imbalance: f64) -> Tick {
        Tick::new(ts_ms, 5.0 * (1.0 + imbalance), 5.0 * (1.0 - imbalance))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.timeframes[1].duration_ms = 250_000;
        assert!(matches!(FlowEngine::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_five_minute_rollup_end_to_end() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        for (minute, imbalance) in [0.2, 0.0, 0.0, 0.6, 0.4].into_iter().enumerate() {
            let start = minute as i64 * 60_000;
            engine.ingest(&tick(start, imbalance), &mut sink).unwrap();
            engine.ingest(&tick(start + 30_000, imbalance), &mut sink).unwrap();
        }
        engine.ingest(&tick(300_000, 0.0), &mut sink).unwrap();

        let minutes = sink.buckets("1m");
        assert_eq!(minutes.len(), 5);
        assert!(minutes.iter().all(|b| b.sample_count == 2));
        for pair in minutes.windows(2) {
            assert_eq!(pair[0].interval_end, pair[1].interval_start);
        }

        let fives = sink.buckets("5m");
        assert_eq!(fives.len(), 1);
        assert_eq!(fives[0].interval_start, 0);
        assert_eq!(fives[0].interval_end, 300_000);
        assert_eq!(fives[0].sample_count, 10);
        assert_abs_diff_eq!(fives[0].avg_imbalance, 0.24, epsilon = 1e-12);

        assert_eq!(engine.history("5m").unwrap().len(), 1);
        assert_eq!(engine.stats().ticks_ingested, 11);
        assert_eq!(engine.stats().buckets_emitted.get("1m"), Some(&5));
    }

    #[test]
    fn test_accumulation_signal_reaches_sink() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        for minute in 0..3i64 {
            let start = minute * 60_000;
            let bid = 10.0 + minute as f64;
            engine.ingest(&Tick::new(start, bid, 2.0), &mut sink).unwrap();
            engine.ingest(&Tick::new(start + 20_000, bid, 2.0), &mut sink).unwrap();
        }
        assert!(sink.signals().is_empty());

        engine.ingest(&Tick::new(180_000, 1.0, 1.0), &mut sink).unwrap();

        let signals = sink.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Accumulation);
        assert_eq!(signals[0].timeframe, "1m");
        assert_eq!(signals[0].ts_ms, 180_000);
        assert_eq!(engine.stats().accumulation_signals, 1);

        // evaluate is read-only and agrees with the emitted signal.
        assert_eq!(engine.evaluate("1m").unwrap(), *signals[0]);
        assert_eq!(engine.evaluate("1m").unwrap(), *signals[0]);
    }

    #[test]
    fn test_evaluate_without_history() {
        let engine = FlowEngine::new(&config()).unwrap();
        let signal = engine.evaluate("5m").unwrap();
        assert_eq!(signal.kind, SignalKind::None);
        assert!(matches!(
            engine.evaluate("1h"),
            Err(Error::UnknownTimeframe(_))
        ));
    }

    #[test]
    fn test_rejected_tick_counted_and_ignored() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        engine.ingest(&tick(10_000, 0.1), &mut sink).unwrap();
        let err = engine.ingest(&tick(5_000, 0.1), &mut sink).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.tick().map(|t| t.ts_ms), Some(5_000));

        assert!(engine
            .ingest(&Tick::new(20_000, f64::NAN, 1.0), &mut sink)
            .is_err());

        assert_eq!(engine.stats().ticks_ingested, 1);
        assert_eq!(engine.stats().ticks_rejected, 2);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_gap_produces_empty_buckets_and_rollup() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        engine.ingest(&tick(0, 0.5), &mut sink).unwrap();
        engine.ingest(&tick(310_000, 0.5), &mut sink).unwrap();

        let minutes = sink.buckets("1m");
        assert_eq!(minutes.len(), 5);
        assert_eq!(minutes.iter().filter(|b| b.is_empty()).count(), 4);

        let fives = sink.buckets("5m");
        assert_eq!(fives.len(), 1);
        assert_eq!(fives[0].sample_count, 1);
        assert_abs_diff_eq!(fives[0].avg_imbalance, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_advance_to_closes_quiet_intervals() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        engine.advance_to(0, &mut sink).unwrap();
        assert!(sink.events.is_empty());

        engine.advance_to(180_000, &mut sink).unwrap();

        let history = engine.history("1m").unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|b| b.is_empty()));
        assert_eq!(engine.evaluate("1m").unwrap().kind, SignalKind::None);
    }

    #[test]
    fn test_shutdown_discard() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        engine.ingest(&tick(0, 0.3), &mut sink).unwrap();
        engine.shutdown(&mut sink).unwrap();

        assert!(sink.events.is_empty());
        assert!(engine.is_terminated());
        assert!(matches!(
            engine.ingest(&tick(1_000, 0.3), &mut sink),
            Err(Error::Terminated)
        ));
        assert_eq!(engine.stats().ticks_rejected, 0);
        assert!(engine.shutdown(&mut sink).is_ok());
    }

    #[test]
    fn test_shutdown_flush_partial() {
        let mut config = config();
        config.shutdown = ShutdownPolicy::FlushPartial;
        let mut engine = FlowEngine::new(&config).unwrap();
        let mut sink = RecordingSink::new();

        for minute in 0..=6i64 {
            engine.ingest(&tick(minute * 60_000 + 1_000, 0.2), &mut sink).unwrap();
        }
        assert_eq!(sink.buckets("1m").len(), 6);
        assert_eq!(sink.buckets("5m").len(), 1);

        engine.shutdown(&mut sink).unwrap();

        let minutes = sink.buckets("1m");
        assert_eq!(minutes.len(), 7);
        assert_eq!(minutes[6].interval_start, 360_000);
        assert_eq!(minutes[6].interval_end, 420_000);

        let fives = sink.buckets("5m");
        assert_eq!(fives.len(), 2);
        assert_eq!(fives[1].interval_start, 300_000);
        assert_eq!(fives[1].interval_end, 420_000);
        assert_eq!(fives[1].sample_count, 2);
    }

    /// Accepts the first `accept` buckets, then fails every write.
    struct FailingSink {
        accept: usize,
        seen: usize,
    }

    impl EventSink for FailingSink {
        fn on_bucket(&mut self, _timeframe: &str, _bucket: &Bucket) -> Result<()> {
            self.seen += 1;
            if self.seen > self.accept {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }

        fn on_signal(&mut self, _signal: &Signal) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_sink_failure_keeps_history_contiguous() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut failing = FailingSink { accept: 1, seen: 0 };

        engine.ingest(&tick(0, 0.5), &mut failing).unwrap();
        let err = engine.ingest(&tick(310_000, 0.5), &mut failing).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(failing.seen, 2);

        // Every closed interval reached history and the rollup despite the failure.
        let minutes: Vec<Bucket> = engine.history("1m").unwrap().iter().copied().collect();
        assert_eq!(minutes.len(), 5);
        for pair in minutes.windows(2) {
            assert_eq!(pair[0].interval_end, pair[1].interval_start);
        }
        assert_eq!(engine.history("5m").unwrap().len(), 1);

        let mut sink = RecordingSink::new();
        engine.ingest(&tick(370_000, 0.5), &mut sink).unwrap();
        assert_eq!(sink.buckets("1m")[0].interval_start, 300_000);
        assert_eq!(engine.history("1m").unwrap().len(), 6);
    }

    #[test]
    fn test_trend_and_confluence() {
        let mut engine = FlowEngine::new(&config()).unwrap();
        let mut sink = RecordingSink::new();

        assert_eq!(engine.trend("1m").unwrap(), None);
        assert_eq!(engine.confluence(), None);

        for (minute, imbalance) in [0.0, 0.1, 0.3].into_iter().enumerate() {
            engine
                .ingest(&tick(minute as i64 * 60_000, imbalance), &mut sink)
                .unwrap();
        }
        engine.ingest(&tick(180_000, 0.3), &mut sink).unwrap();

        let trend = engine.trend("1m").unwrap().unwrap();
        assert_eq!(trend.direction, TrendDirection::Up);
        assert_abs_diff_eq!(trend.imbalance_speed, 0.2, epsilon = 1e-9);

        // 5m has no buckets yet, so the timeframes cannot agree.
        assert_eq!(engine.confluence(), None);
    }
}
