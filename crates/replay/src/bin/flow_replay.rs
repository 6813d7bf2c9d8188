//! Replay a recorded tick stream through the flow engine.
//!
//! Ticks are read on a blocking task and handed to the single engine owner
//! over a channel, so ordering is preserved end to end.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flow_core::{Config, Tick};
use flow_features::{EventSink, TracingSink};
use flow_replay::{JsonlSink, JsonlTickSource, ReplayRunner, TickSource};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recorded stream, one JSON tick or depth record per line
    #[arg(short, long)]
    input: PathBuf,

    /// Write bucket and signal events here as JSON lines instead of logging them
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(cfg!(debug_assertions))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let mut source = JsonlTickSource::open(&cli.input, config.instrument.depth_levels)
        .with_context(|| format!("opening input {}", cli.input.display()))?;

    let mut sink: Box<dyn EventSink> = match &cli.events {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating events file {}", path.display()))?;
            Box::new(JsonlSink::new(BufWriter::new(file)))
        }
        None => Box::new(TracingSink),
    };

    let mut runner = ReplayRunner::new(&config)?;

    let (tx, mut rx) = mpsc::channel::<Tick>(CHANNEL_CAPACITY);
    let reader = tokio::task::spawn_blocking(move || -> flow_core::Result<_> {
        while let Some(tick) = source.next_tick()? {
            if tx.blocking_send(tick).is_err() {
                break;
            }
        }
        Ok(source)
    });

    info!(input = %cli.input.display(), sink = sink.name(), "replaying");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut listening = true;

    loop {
        tokio::select! {
            tick = rx.recv() => match tick {
                Some(tick) => {
                    runner.step(&tick, sink.as_mut())?;
                }
                None => break,
            },
            result = &mut ctrl_c, if listening => match result {
                Ok(()) => {
                    runner.interrupt();
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to listen for ctrl-c");
                    listening = false;
                }
            },
        }
    }

    // Unblocks the reader if it is waiting on a full channel.
    drop(rx);

    let source = reader.await.context("reader task panicked")??;
    let skipped = source.skipped_lines();
    if skipped > 0 {
        warn!(skipped, "malformed input lines skipped");
    }

    let report = runner.finish(sink.as_mut(), source.book())?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
