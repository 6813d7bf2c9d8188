//! JSON-lines event output.

use std::io::Write;

use flow_core::{Bucket, Result, Signal};
use flow_features::{EventSink, SinkEvent};

/// Writes each bucket and signal as one JSON object per line.
pub struct JsonlSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: &SinkEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }
}

impl<W: Write> EventSink for JsonlSink<W> {
    fn on_bucket(&mut self, timeframe: &str, bucket: &Bucket) -> Result<()> {
        self.write_event(&SinkEvent::Bucket {
            timeframe: timeframe.to_string(),
            bucket: *bucket,
        })
    }

    fn on_signal(&mut self, signal: &Signal) -> Result<()> {
        self.write_event(&SinkEvent::Signal(signal.clone()))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
