//! Deterministic replay of a tick stream through a fresh engine.

use flow_core::{Config, Result, Tick, TimestampMs};
use flow_features::{EventSink, FlowEngine};
use flow_ingestion::OrderBook;
use tracing::{debug, info, warn};

use crate::report::ReplayReport;
use crate::source::TickSource;

/// Drives a `FlowEngine` from a tick source.
///
/// Data-quality rejections are logged and skipped; any other error stops
/// the run.
pub struct ReplayRunner {
    engine: FlowEngine,
    symbol: String,
    large_order_multiplier: f64,
    first_tick_ms: Option<TimestampMs>,
    last_tick_ms: Option<TimestampMs>,
    interrupted: bool,
}

impl ReplayRunner {
    /// Build a runner with a freshly configured engine.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            engine: FlowEngine::new(config)?,
            symbol: config.instrument.symbol.clone(),
            large_order_multiplier: config.instrument.large_order_multiplier,
            first_tick_ms: None,
            last_tick_ms: None,
            interrupted: false,
        })
    }

    /// Replay every tick from `source`, then shut down and report.
    pub fn run<T, S>(&mut self, source: &mut T, sink: &mut S) -> Result<ReplayReport>
    where
        T: TickSource + ?Sized,
        S: EventSink + ?Sized,
    {
        info!(sink = sink.name(), symbol = %self.symbol, "replay started");
        while let Some(tick) = source.next_tick()? {
            self.step(&tick, sink)?;
        }
        self.finish(sink, source.book())
    }

    /// Feed one tick. Returns whether it was accepted.
    pub fn step<S: EventSink + ?Sized>(&mut self, tick: &Tick, sink: &mut S) -> Result<bool> {
        match self.engine.ingest(tick, sink) {
            Ok(()) => {
                self.first_tick_ms.get_or_insert(tick.ts_ms);
                self.last_tick_ms = Some(tick.ts_ms);
                Ok(true)
            }
            Err(err) if err.is_recoverable() => {
                debug!(error = %err, "replay skipped tick");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Mark the run as stopped early.
    pub fn interrupt(&mut self) {
        warn!("replay interrupted");
        self.interrupted = true;
    }

    /// Shut the engine down and summarize the run.
    ///
    /// `book` is the source's final order book, scanned for large levels.
    pub fn finish<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        book: Option<&OrderBook>,
    ) -> Result<ReplayReport> {
        self.engine.shutdown(sink)?;

        let stats = self.engine.stats();
        let final_signals = self
            .engine
            .timeframes()
            .iter()
            .map(|tf| self.engine.evaluate(&tf.name))
            .collect::<Result<Vec<_>>>()?;

        let mut report = ReplayReport {
            symbol: self.symbol.clone(),
            ticks_ingested: stats.ticks_ingested,
            ticks_rejected: stats.ticks_rejected,
            buckets_emitted: stats.buckets_emitted.clone(),
            accumulation_signals: stats.accumulation_signals,
            distribution_signals: stats.distribution_signals,
            final_signals,
            confluence: self.engine.confluence(),
            large_orders: book.map(|b| b.large_orders(self.large_order_multiplier)),
            interrupted: self.interrupted,
            ..Default::default()
        };
        report.set_tick_range(self.first_tick_ms, self.last_tick_ms);

        info!(
            ticks = report.ticks_ingested,
            rejected = report.ticks_rejected,
            buckets = report.total_buckets(),
            interrupted = report.interrupted,
            "replay finished"
        );
        Ok(report)
    }

    /// The engine being driven.
    pub fn engine(&self) -> &FlowEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{JsonlTickSource, VecTickSource};
    use flow_features::RecordingSink;
    use std::io::Cursor;

    #[test]
    fn test_rejections_skipped() {
        let mut runner = ReplayRunner::new(&Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        let mut source = VecTickSource::new(vec![
            Tick::new(10_000, 1.0, 1.0),
            Tick::new(5_000, 1.0, 1.0),
            Tick::new(20_000, -1.0, 1.0),
            Tick::new(70_000, 3.0, 1.0),
        ]);

        let report = runner.run(&mut source, &mut sink).unwrap();

        assert_eq!(report.ticks_ingested, 2);
        assert_eq!(report.ticks_rejected, 2);
        assert_eq!(report.span_ms(), Some(60_000));
        assert_eq!(report.buckets_emitted.get("1m"), Some(&1));
        assert_eq!(report.final_signals.len(), 3);
        assert!(!report.interrupted);
    }

    #[test]
    fn test_empty_source() {
        let mut runner = ReplayRunner::new(&Config::default()).unwrap();
        let mut sink = RecordingSink::new();

        let report = runner.run(&mut VecTickSource::default(), &mut sink).unwrap();

        assert_eq!(report.ticks_ingested, 0);
        assert!(report.first_tick.is_none());
        assert!(sink.events.is_empty());
        assert!(runner.engine().is_terminated());
        assert!(report.large_orders.is_none());
    }

    #[test]
    fn test_large_orders_from_final_book() {
        let data = [
            r#"{"type":"depth","ts_ms":0,"bids":[[99.0,1.0],[98.0,1.0]],"asks":[[101.0,1.0],[102.0,1.0]]}"#,
            r#"{"type":"depth","ts_ms":1000,"bids":[[97.0,30.0]],"asks":[[103.0,1.0]]}"#,
            r#"{"type":"depth","ts_ms":2000,"bids":[[98.0,0.0]],"asks":[]}"#,
        ]
        .join("\n");
        let mut runner = ReplayRunner::new(&Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        let mut source = JsonlTickSource::new(Cursor::new(data), 20);

        let report = runner.run(&mut source, &mut sink).unwrap();

        // levels 1, 30, 1, 1, 1: mean 6.8, threshold 20.4
        let large = report.large_orders.unwrap();
        assert_eq!(large.bids.len(), 1);
        assert_eq!(large.bids[0].price, 97.0);
        assert_eq!(large.bids[0].quantity, 30.0);
        assert!(large.asks.is_empty());
        assert_eq!(report.ticks_ingested, 3);
    }
}
