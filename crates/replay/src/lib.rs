//! Replay tooling for the flow-imbalance system.
//!
//! This crate provides:
//! - Tick sources (in-memory and recorded JSON lines)
//! - A deterministic replay runner over a fresh engine
//! - JSON-lines event output
//! - Run summaries

pub mod report;
pub mod runner;
pub mod sink;
pub mod source;

pub use report::ReplayReport;
pub use runner::ReplayRunner;
pub use sink::JsonlSink;
pub use source::{JsonlTickSource, ReplayRecord, TickSource, VecTickSource};
