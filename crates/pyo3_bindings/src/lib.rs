//! PyO3 bindings for the flow-imbalance engine.
//!
//! Exposes the Rust core to Python:
//! - Tick, Bucket and Signal value types
//! - The multi-timeframe engine with detector evaluation

use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use flow_core::{
    Bucket as RustBucket, Config as RustConfig, Error as RustError, NoSignalReason,
    Signal as RustSignal, SignalKind, Tick as RustTick,
};
use flow_features::{FlowEngine, RecordingSink, SinkEvent};

fn to_py_err(err: RustError) -> PyErr {
    match &err {
        RustError::UnknownTimeframe(name) => PyKeyError::new_err(name.clone()),
        RustError::Terminated | RustError::Io(_) => {
            PyRuntimeError::new_err(err.to_string())
        }
        _ => PyValueError::new_err(err.to_string()),
    }
}

// ============================================================================
// Python-exposed Types
// ============================================================================

/// A single order-book observation.
#[pyclass]
#[derive(Clone)]
pub struct Tick {
    #[pyo3(get, set)]
    pub ts_ms: i64,
    #[pyo3(get, set)]
    pub bid_volume: f64,
    #[pyo3(get, set)]
    pub ask_volume: f64,
}

#[pymethods]
impl Tick {
    #[new]
    fn new(ts_ms: i64, bid_volume: f64, ask_volume: f64) -> Self {
        Tick {
            ts_ms,
            bid_volume,
            ask_volume,
        }
    }

    #[getter]
    fn imbalance(&self) -> f64 {
        RustTick::from(self.clone()).imbalance()
    }

    fn __repr__(&self) -> String {
        format!(
            "Tick(ts_ms={}, bid_volume={}, ask_volume={})",
            self.ts_ms, self.bid_volume, self.ask_volume
        )
    }
}

impl From<Tick> for RustTick {
    fn from(t: Tick) -> Self {
        RustTick::new(t.ts_ms, t.bid_volume, t.ask_volume)
    }
}

/// A finalized interval summary.
#[pyclass]
#[derive(Clone)]
pub struct Bucket {
    #[pyo3(get)]
    pub interval_start: i64,
    #[pyo3(get)]
    pub interval_end: i64,
    #[pyo3(get)]
    pub avg_imbalance: f64,
    #[pyo3(get)]
    pub avg_bid_volume: f64,
    #[pyo3(get)]
    pub avg_ask_volume: f64,
    #[pyo3(get)]
    pub sample_count: u64,
}

#[pymethods]
impl Bucket {
    fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    fn __repr__(&self) -> String {
        format!(
            "Bucket([{}, {}), imbalance={:.4}, samples={})",
            self.interval_start, self.interval_end, self.avg_imbalance, self.sample_count
        )
    }
}

impl From<RustBucket> for Bucket {
    fn from(b: RustBucket) -> Self {
        Bucket {
            interval_start: b.interval_start,
            interval_end: b.interval_end,
            avg_imbalance: b.avg_imbalance,
            avg_bid_volume: b.avg_bid_volume,
            avg_ask_volume: b.avg_ask_volume,
            sample_count: b.sample_count,
        }
    }
}

/// Detector result for one timeframe.
#[pyclass]
#[derive(Clone)]
pub struct Signal {
    inner: RustSignal,
}

fn kind_name(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Accumulation => "accumulation",
        SignalKind::Distribution => "distribution",
        SignalKind::None => "none",
    }
}

fn reason_name(reason: NoSignalReason) -> &'static str {
    match reason {
        NoSignalReason::InsufficientHistory => "insufficient_history",
        NoSignalReason::InsufficientSamples => "insufficient_samples",
        NoSignalReason::SparseWindow => "sparse_window",
        NoSignalReason::BelowThreshold => "below_threshold",
        NoSignalReason::TrendNotConfirmed => "trend_not_confirmed",
    }
}

#[pymethods]
impl Signal {
    #[getter]
    fn timeframe(&self) -> String {
        self.inner.timeframe.clone()
    }

    #[getter]
    fn ts_ms(&self) -> i64 {
        self.inner.ts_ms
    }

    /// "accumulation", "distribution" or "none".
    #[getter]
    fn kind(&self) -> &'static str {
        kind_name(self.inner.kind)
    }

    #[getter]
    fn reason(&self) -> Option<&'static str> {
        self.inner.reason.map(reason_name)
    }

    #[getter]
    fn avg_imbalance(&self) -> f64 {
        self.inner.metrics.avg_imbalance
    }

    #[getter]
    fn bid_volume_slope(&self) -> f64 {
        self.inner.metrics.bid_volume_slope
    }

    #[getter]
    fn ask_volume_slope(&self) -> f64 {
        self.inner.metrics.ask_volume_slope
    }

    #[getter]
    fn total_samples(&self) -> u64 {
        self.inner.metrics.total_samples
    }

    #[getter]
    fn empty_buckets(&self) -> usize {
        self.inner.metrics.empty_buckets
    }

    /// JSON form, as written by the replay event log.
    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "Signal(timeframe={}, ts_ms={}, kind={})",
            self.inner.timeframe,
            self.inner.ts_ms,
            kind_name(self.inner.kind)
        )
    }
}

impl From<RustSignal> for Signal {
    fn from(inner: RustSignal) -> Self {
        Signal { inner }
    }
}

/// Buckets (tagged with their timeframe) and signals emitted by one call.
type Emitted = (Vec<(String, Bucket)>, Vec<Signal>);

fn drain(sink: RecordingSink) -> Emitted {
    let mut buckets = Vec::new();
    let mut signals = Vec::new();
    for event in sink.events {
        match event {
            SinkEvent::Bucket { timeframe, bucket } => buckets.push((timeframe, bucket.into())),
            SinkEvent::Signal(signal) => signals.push(signal.into()),
        }
    }
    (buckets, signals)
}

// ============================================================================
// Engine
// ============================================================================

/// Multi-timeframe imbalance engine.
#[pyclass]
pub struct PyFlowEngine {
    inner: FlowEngine,
}

#[pymethods]
impl PyFlowEngine {
    /// Create from a JSON config, or defaults when omitted.
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => RustConfig::from_json_str(json).map_err(to_py_err)?,
            None => RustConfig::default(),
        };
        let inner = FlowEngine::new(&config).map_err(to_py_err)?;
        Ok(PyFlowEngine { inner })
    }

    /// Ingest a tick. Returns (buckets, signals) finalized by it.
    fn ingest(&mut self, tick: &Tick) -> PyResult<Emitted> {
        let mut sink = RecordingSink::new();
        self.inner
            .ingest(&tick.clone().into(), &mut sink)
            .map_err(to_py_err)?;
        Ok(drain(sink))
    }

    /// Close every interval ending at or before `ts_ms`.
    fn advance_to(&mut self, ts_ms: i64) -> PyResult<Emitted> {
        let mut sink = RecordingSink::new();
        self.inner.advance_to(ts_ms, &mut sink).map_err(to_py_err)?;
        Ok(drain(sink))
    }

    /// Evaluate the detector for a timeframe.
    fn evaluate(&self, timeframe: &str) -> PyResult<Signal> {
        self.inner
            .evaluate(timeframe)
            .map(Signal::from)
            .map_err(to_py_err)
    }

    /// Retained buckets for a timeframe, oldest first.
    fn history(&self, timeframe: &str) -> PyResult<Vec<Bucket>> {
        let history = self.inner.history(timeframe).map_err(to_py_err)?;
        Ok(history.iter().map(|b| Bucket::from(*b)).collect())
    }

    /// Timeframe names, base first.
    fn timeframes(&self) -> Vec<String> {
        self.inner
            .timeframes()
            .iter()
            .map(|tf| tf.name.clone())
            .collect()
    }

    /// Apply the shutdown policy. Returns anything it flushed.
    fn shutdown(&mut self) -> PyResult<Emitted> {
        let mut sink = RecordingSink::new();
        self.inner.shutdown(&mut sink).map_err(to_py_err)?;
        Ok(drain(sink))
    }

    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

// ============================================================================
// Module Definition
// ============================================================================

/// Flow Imbalance Core - multi-timeframe order flow aggregation for Python.
#[pymodule]
fn flow_imbalance_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Types
    m.add_class::<Tick>()?;
    m.add_class::<Bucket>()?;
    m.add_class::<Signal>()?;

    // Engine
    m.add_class::<PyFlowEngine>()?;

    Ok(())
}
