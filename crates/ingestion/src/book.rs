//! Local order book maintained from depth updates.
//!
//! Reduces the book to a `Tick` by summing notional volume over the best
//! levels on each side.

use std::collections::BTreeMap;

use flow_core::{DepthUpdate, Price, Size, Tick, TimestampMs};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Price-level book for one instrument.
#[derive(Debug, Clone)]
pub struct OrderBook {
    bids: BTreeMap<Price, Size>,
    asks: BTreeMap<Price, Size>,
    /// Levels per side summed into tick volumes.
    depth_levels: usize,
}

/// A resting level significantly larger than the book average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeOrder {
    pub price: f64,
    pub quantity: Size,
}

/// Large resting levels on each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LargeOrders {
    pub bids: Vec<LargeOrder>,
    pub asks: Vec<LargeOrder>,
}

impl OrderBook {
    /// Create an empty book summarizing `depth_levels` levels per side.
    pub fn new(depth_levels: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            depth_levels,
        }
    }

    /// Apply a depth update. A non-positive quantity removes the level.
    pub fn apply(&mut self, update: &DepthUpdate) {
        apply_side(&mut self.bids, &update.bids);
        apply_side(&mut self.asks, &update.asks);
    }

    /// Best bid price.
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|p| p.0)
    }

    /// Best ask price.
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|p| p.0)
    }

    /// Mid price, if both sides are populated.
    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }

    /// Reduce the book to a tick of notional (qty x mid) volume per side.
    ///
    /// `None` when either side is empty.
    pub fn to_tick(&self, ts_ms: TimestampMs) -> Option<Tick> {
        let mid = self.mid()?;
        let bid_qty: Size = self.bids.values().rev().take(self.depth_levels).sum();
        let ask_qty: Size = self.asks.values().take(self.depth_levels).sum();
        Some(Tick::new(ts_ms, bid_qty * mid, ask_qty * mid))
    }

    /// Levels whose quantity exceeds `multiplier` times the mean level quantity.
    pub fn large_orders(&self, multiplier: f64) -> LargeOrders {
        let level_count = self.bids.len() + self.asks.len();
        if level_count == 0 {
            return LargeOrders::default();
        }

        let total: Size = self.bids.values().chain(self.asks.values()).sum();
        let threshold = total / level_count as f64 * multiplier;

        let collect = |side: &BTreeMap<Price, Size>| {
            side.iter()
                .filter(|(_, qty)| **qty > threshold)
                .map(|(price, qty)| LargeOrder {
                    price: price.0,
                    quantity: *qty,
                })
                .collect::<Vec<_>>()
        };

        LargeOrders {
            bids: collect(&self.bids),
            asks: collect(&self.asks),
        }
    }

    /// Number of (bid, ask) levels.
    pub fn level_counts(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

fn apply_side(side: &mut BTreeMap<Price, Size>, levels: &[(f64, Size)]) {
    for &(price, qty) in levels {
        if !price.is_finite() {
            continue;
        }
        if qty > 0.0 {
            side.insert(OrderedFloat(price), qty);
        } else {
            side.remove(&OrderedFloat(price));
        }
    }
}
