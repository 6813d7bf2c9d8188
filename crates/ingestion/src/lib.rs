//! Tick ingestion for the flow-imbalance system.
//!
//! This crate handles:
//! - Order book maintenance from depth updates
//! - Per-interval tick accumulation
//! - Base bucket building on time boundaries

pub mod book;
pub mod bucket_aggregator;
pub mod tick_buffer;

pub use book::{LargeOrder, LargeOrders, OrderBook};
pub use bucket_aggregator::{BucketAggregator, IntervalState};
pub use tick_buffer::TickBuffer;
