//! Configuration structures for the flow-imbalance system.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DurationMs, Timeframe};

/// Main configuration for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrument configuration.
    pub instrument: InstrumentConfig,
    /// Timeframes, finest first.
    pub timeframes: Vec<TimeframeConfig>,
    /// Pattern detector configuration.
    pub detector: DetectorConfig,
    /// What happens to open intervals on shutdown.
    pub shutdown: ShutdownPolicy,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: InstrumentConfig::default(),
            timeframes: default_timeframes(),
            detector: DetectorConfig::default(),
            shutdown: ShutdownPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check timeframe consistency and detector thresholds.
    pub fn validate(&self) -> Result<()> {
        let Some(base) = self.timeframes.first() else {
            return Err(Error::config("at least one timeframe is required"));
        };
        if base.duration_ms <= 0 {
            return Err(Error::config(format!(
                "base timeframe {} must have a positive duration",
                base.name
            )));
        }
        if base.ratio_to_base != 1 {
            return Err(Error::config(format!(
                "base timeframe {} must have ratio 1, got {}",
                base.name, base.ratio_to_base
            )));
        }

        let multiplier = self.instrument.large_order_multiplier;
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(Error::config(format!(
                "large_order_multiplier must be positive, got {multiplier}"
            )));
        }

        let mut names = HashSet::new();
        for (i, tf) in self.timeframes.iter().enumerate() {
            if tf.name.is_empty() {
                return Err(Error::config(format!("timeframe #{i} has an empty name")));
            }
            if !names.insert(tf.name.as_str()) {
                return Err(Error::config(format!("duplicate timeframe name {}", tf.name)));
            }
            if tf.max_history_length == 0 {
                return Err(Error::config(format!(
                    "timeframe {} must retain at least one bucket",
                    tf.name
                )));
            }
            let lookback = tf.lookback.unwrap_or(self.detector.lookback);
            if lookback == 0 || lookback > tf.max_history_length {
                return Err(Error::config(format!(
                    "timeframe {} lookback {} must be within 1..={}",
                    tf.name, lookback, tf.max_history_length
                )));
            }
            if i == 0 {
                continue;
            }

            let prev = &self.timeframes[i - 1];
            if tf.ratio_to_base == 0 {
                return Err(Error::config(format!(
                    "timeframe {} ratio must be a positive integer",
                    tf.name
                )));
            }
            let expected = prev
                .duration_ms
                .checked_mul(tf.ratio_to_base as DurationMs)
                .ok_or_else(|| Error::config(format!("timeframe {} duration overflows", tf.name)))?;
            if tf.duration_ms != expected {
                return Err(Error::config(format!(
                    "timeframe {} duration {}ms != {} x {}ms ({})",
                    tf.name, tf.duration_ms, tf.ratio_to_base, prev.duration_ms, prev.name
                )));
            }
        }

        self.detector.validate()
    }

    /// Timeframes with effective lookbacks resolved.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.timeframes
            .iter()
            .map(|tf| Timeframe {
                name: tf.name.clone(),
                duration_ms: tf.duration_ms,
                ratio_to_base: tf.ratio_to_base,
                max_history_length: tf.max_history_length,
                lookback: tf.lookback.unwrap_or(self.detector.lookback),
            })
            .collect()
    }
}

/// Instrument-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Trading symbol (e.g., "STRKUSDT").
    pub symbol: String,
    /// Book levels per side summed into tick volumes.
    pub depth_levels: usize,
    /// A book level is large above this multiple of the mean level size.
    pub large_order_multiplier: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "STRKUSDT".to_string(),
            depth_levels: 20,
            large_order_multiplier: 3.0,
        }
    }
}

/// One configured timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeConfig {
    /// Display name.
    pub name: String,
    /// Bucket width in milliseconds.
    pub duration_ms: DurationMs,
    /// Count of immediately-finer buckets per bucket (1 for the base).
    pub ratio_to_base: u32,
    /// Maximum retained buckets.
    pub max_history_length: usize,
    /// Detector lookback override.
    #[serde(default)]
    pub lookback: Option<usize>,
}

impl TimeframeConfig {
    /// Create a timeframe definition without a lookback override.
    pub fn new(
        name: impl Into<String>,
        duration_ms: DurationMs,
        ratio_to_base: u32,
        max_history_length: usize,
    ) -> Self {
        Self {
            name: name.into(),
            duration_ms,
            ratio_to_base,
            max_history_length,
            lookback: None,
        }
    }

    /// Set the detector lookback for this timeframe.
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = Some(lookback);
        self
    }
}

/// 1m / 5m / 15m, one hour of history each.
pub fn default_timeframes() -> Vec<TimeframeConfig> {
    vec![
        TimeframeConfig::new("1m", 60_000, 1, 60).with_lookback(10),
        TimeframeConfig::new("5m", 300_000, 5, 12).with_lookback(6),
        TimeframeConfig::new("15m", 900_000, 3, 4).with_lookback(4),
    ]
}

/// How empty buckets enter the detector window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBucketPolicy {
    /// Keep them with neutral values and count them toward the sparse check.
    #[default]
    Include,
    /// Skip them; the window is the newest `lookback` non-empty buckets.
    Exclude,
}

/// Pattern detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum absolute window imbalance for a pattern.
    pub imbalance_threshold: f64,
    /// Volume slope (per bucket) that confirms a trend even when not monotone.
    pub volume_slope_threshold: f64,
    /// Minimum total samples across the window.
    pub min_sample_count: u64,
    /// Default lookback in buckets.
    pub lookback: usize,
    /// Maximum fraction of empty buckets before signaling is suppressed.
    pub max_empty_fraction: f64,
    /// Empty bucket handling.
    pub empty_buckets: EmptyBucketPolicy,
    /// Imbalance change that marks a trend as up or down.
    pub trend_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            imbalance_threshold: 0.3,
            volume_slope_threshold: 0.0,
            min_sample_count: 5,
            lookback: 3,
            max_empty_fraction: 0.5,
            empty_buckets: EmptyBucketPolicy::Include,
            trend_threshold: 0.05,
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> Result<()> {
        if !(self.imbalance_threshold > 0.0 && self.imbalance_threshold <= 1.0) {
            return Err(Error::config(format!(
                "imbalance_threshold must be in (0, 1], got {}",
                self.imbalance_threshold
            )));
        }
        if !self.volume_slope_threshold.is_finite() {
            return Err(Error::config("volume_slope_threshold must be finite"));
        }
        if !(0.0..=1.0).contains(&self.max_empty_fraction) {
            return Err(Error::config(format!(
                "max_empty_fraction must be in [0, 1], got {}",
                self.max_empty_fraction
            )));
        }
        if !(self.trend_threshold.is_finite() && self.trend_threshold >= 0.0) {
            return Err(Error::config("trend_threshold must be finite and non-negative"));
        }
        if self.lookback == 0 {
            return Err(Error::config("lookback must be at least 1"));
        }
        Ok(())
    }
}

/// Fate of the open (partial) interval at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Drop the open interval and pending rollups.
    #[default]
    Discard,
    /// Emit the open interval and pending rollups as partial buckets.
    FlushPartial,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
