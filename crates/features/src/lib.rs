//! Multi-timeframe aggregation and pattern detection.
//!
//! This crate handles:
//! - Rolling base buckets up into coarser timeframes
//! - Bounded per-timeframe history
//! - Accumulation / distribution detection
//! - Imbalance trend summaries
//! - The wired engine and its outbound event sinks

pub mod detector;
pub mod engine;
pub mod history;
pub mod roller;
pub mod sink;
pub mod trend;

pub use detector::PatternDetector;
pub use engine::{EngineStats, FlowEngine};
pub use history::HistoryStore;
pub use roller::{combine, TimeframeRoller};
pub use sink::{EventSink, RecordingSink, SinkEvent, TracingSink};
