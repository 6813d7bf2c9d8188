//! Accumulation / distribution pattern detection.
//!
//! Classification is a pure function of the evaluated window; the detector
//! holds configuration only.

use flow_core::{
    Bucket, DetectorConfig, EmptyBucketPolicy, NoSignalReason, Signal, SignalKind, SignalMetrics,
};
use statrs::statistics::Statistics;

use crate::history::HistoryStore;

/// Evaluates accumulation/distribution rules over a timeframe's history.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: DetectorConfig,
}

impl PatternDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Detector configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Read the lookback window from history and classify it.
    pub fn evaluate(&self, history: &HistoryStore, lookback: usize) -> Signal {
        let window = self.select_window(history, lookback);
        self.classify(history.timeframe(), &window, lookback)
    }

    /// The buckets the rules run over, oldest first.
    pub fn select_window(&self, history: &HistoryStore, lookback: usize) -> Vec<Bucket> {
        match self.config.empty_buckets {
            EmptyBucketPolicy::Include => history.window(lookback),
            EmptyBucketPolicy::Exclude => {
                let mut window: Vec<Bucket> = history
                    .iter()
                    .rev()
                    .filter(|b| !b.is_empty())
                    .take(lookback)
                    .copied()
                    .collect();
                window.reverse();
                window
            }
        }
    }

    /// Classify the newest `lookback` buckets of `window`.
    ///
    /// A window shorter than `lookback` is always `None`.
    pub fn classify(&self, timeframe: &str, window: &[Bucket], lookback: usize) -> Signal {
        let window = &window[window.len().saturating_sub(lookback)..];
        let metrics = window_metrics(window);
        let ts_ms = window.last().map(|b| b.interval_end).unwrap_or(0);

        let (kind, reason) = self.rule(window, &metrics, lookback);

        Signal {
            timeframe: timeframe.to_string(),
            ts_ms,
            kind,
            metrics,
            reason,
        }
    }

    fn rule(
        &self,
        window: &[Bucket],
        metrics: &SignalMetrics,
        lookback: usize,
    ) -> (SignalKind, Option<NoSignalReason>) {
        let none = |reason| (SignalKind::None, Some(reason));

        if window.is_empty() || window.len() < lookback {
            return none(NoSignalReason::InsufficientHistory);
        }
        let empty_fraction = metrics.empty_buckets as f64 / window.len() as f64;
        if empty_fraction > self.config.max_empty_fraction {
            return none(NoSignalReason::SparseWindow);
        }
        if metrics.total_samples < self.config.min_sample_count {
            return none(NoSignalReason::InsufficientSamples);
        }

        let threshold = self.config.imbalance_threshold;
        if metrics.avg_imbalance > threshold {
            let bids: Vec<f64> = window.iter().map(|b| b.avg_bid_volume).collect();
            if self.volume_confirms(&bids, metrics.bid_volume_slope) {
                return (SignalKind::Accumulation, None);
            }
            return none(NoSignalReason::TrendNotConfirmed);
        }
        if metrics.avg_imbalance < -threshold {
            let asks: Vec<f64> = window.iter().map(|b| b.avg_ask_volume).collect();
            if self.volume_confirms(&asks, metrics.ask_volume_slope) {
                return (SignalKind::Distribution, None);
            }
            return none(NoSignalReason::TrendNotConfirmed);
        }

        none(NoSignalReason::BelowThreshold)
    }

    fn volume_confirms(&self, volumes: &[f64], slope: f64) -> bool {
        is_non_decreasing(volumes) || slope > self.config.volume_slope_threshold
    }
}

/// Summary metrics over a window. All zeros for an empty window.
pub fn window_metrics(window: &[Bucket]) -> SignalMetrics {
    if window.is_empty() {
        return SignalMetrics::default();
    }

    let bids: Vec<f64> = window.iter().map(|b| b.avg_bid_volume).collect();
    let asks: Vec<f64> = window.iter().map(|b| b.avg_ask_volume).collect();

    SignalMetrics {
        window_len: window.len(),
        avg_imbalance: window.iter().map(|b| b.avg_imbalance).mean(),
        bid_volume_slope: slope(&bids),
        ask_volume_slope: slope(&asks),
        total_samples: window.iter().map(|b| b.sample_count).sum(),
        empty_buckets: window.iter().filter(|b| b.is_empty()).count(),
    }
}

/// Least-squares slope of `values` against their index. Zero below two points.
pub fn slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let var = xs.iter().variance();
    if var > 0.0 {
        xs.iter().covariance(values.iter()) / var
    } else {
        0.0
    }
}

fn is_non_decreasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[1] >= w[0])
}
