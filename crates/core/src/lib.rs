//! Core types and configuration for the flow-imbalance system.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (ticks, depth updates, buckets)
//! - Timeframe and detector configuration
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DetectorConfig, EmptyBucketPolicy, ShutdownPolicy, TimeframeConfig};
pub use error::{Error, Result};
pub use types::*;
