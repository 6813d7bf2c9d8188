//! Tick sources for replay.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flow_core::{DepthUpdate, Result, Tick};
use flow_ingestion::OrderBook;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Ordered supply of ticks.
pub trait TickSource {
    /// Next tick, `Ok(None)` once the source is exhausted.
    fn next_tick(&mut self) -> Result<Option<Tick>>;

    /// Order book the source maintains, if it reduces depth itself.
    fn book(&self) -> Option<&OrderBook> {
        None
    }
}

/// In-memory tick sequence.
#[derive(Debug, Clone, Default)]
pub struct VecTickSource {
    ticks: VecDeque<Tick>,
}

impl VecTickSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self {
            ticks: ticks.into(),
        }
    }

    /// Ticks not yet consumed.
    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }
}

impl TickSource for VecTickSource {
    fn next_tick(&mut self) -> Result<Option<Tick>> {
        Ok(self.ticks.pop_front())
    }
}

/// One line of a recorded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    /// Pre-computed tick volumes.
    Tick(Tick),
    /// Order book change, reduced to a tick through the local book.
    Depth(DepthUpdate),
}

/// Newline-delimited JSON records.
///
/// Blank and malformed lines are skipped. Depth records update a local
/// order book and yield a tick once both sides are populated.
pub struct JsonlTickSource<R> {
    reader: R,
    book: OrderBook,
    line: String,
    line_no: u64,
    skipped_lines: u64,
}

impl JsonlTickSource<BufReader<File>> {
    /// Open a recording on disk.
    pub fn open(path: impl AsRef<Path>, depth_levels: usize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), depth_levels))
    }
}

impl<R: BufRead> JsonlTickSource<R> {
    pub fn new(reader: R, depth_levels: usize) -> Self {
        Self {
            reader,
            book: OrderBook::new(depth_levels),
            line: String::new(),
            line_no: 0,
            skipped_lines: 0,
        }
    }

    /// Lines that could not be parsed.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }
}

impl<R: BufRead> TickSource for JsonlTickSource<R> {
    fn next_tick(&mut self) -> Result<Option<Tick>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            let record = match serde_json::from_str::<ReplayRecord>(line) {
                Ok(record) => record,
                Err(err) => {
                    self.skipped_lines += 1;
                    warn!(line = self.line_no, error = %err, "skipping malformed record");
                    continue;
                }
            };

            match record {
                ReplayRecord::Tick(tick) => return Ok(Some(tick)),
                ReplayRecord::Depth(update) => {
                    self.book.apply(&update);
                    match self.book.to_tick(update.ts_ms) {
                        Some(tick) => return Ok(Some(tick)),
                        None => trace!(ts_ms = update.ts_ms, "book one-sided, no tick"),
                    }
                }
            }
        }
    }

    fn book(&self) -> Option<&OrderBook> {
        Some(&self.book)
    }
}
