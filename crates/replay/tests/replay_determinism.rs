use std::io::Cursor;

use approx::assert_abs_diff_eq;
use flow_core::{Config, ShutdownPolicy, SignalKind, Tick};
use flow_features::{RecordingSink, SinkEvent};
use flow_replay::{JsonlSink, JsonlTickSource, ReplayRecord, ReplayRunner, VecTickSource};

/// Twenty minutes of ticks every 7s, bid pressure building after minute 8,
/// with a quiet stretch between minutes 4 and 6.
fn session() -> Vec<Tick> {
    (0..(20 * 60 / 7))
        .map(|i| i * 7_000)
        .filter(|ts| !(240_000..360_000).contains(ts))
        .map(|ts| {
            let minute = (ts / 60_000) as f64;
            let wobble = ((ts / 7_000) % 5) as f64;
            let bid = if minute >= 8.0 { 20.0 + minute * 2.0 } else { 10.0 + wobble };
            Tick::new(ts, bid, 10.0 + (4.0 - wobble))
        })
        .collect()
}

fn replay_to_bytes(config: &Config, ticks: Vec<Tick>) -> Vec<u8> {
    let mut runner = ReplayRunner::new(config).unwrap();
    let mut sink = JsonlSink::new(Vec::new());
    runner
        .run(&mut VecTickSource::new(ticks), &mut sink)
        .unwrap();
    sink.into_inner()
}

#[test]
fn test_replay_is_byte_identical() {
    let mut config = Config::default();
    config.shutdown = ShutdownPolicy::FlushPartial;

    let first = replay_to_bytes(&config, session());
    let second = replay_to_bytes(&config, session());

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_session_history_is_contiguous_and_signals() {
    let config = Config::default();
    let mut runner = ReplayRunner::new(&config).unwrap();
    let mut sink = RecordingSink::new();

    let report = runner
        .run(&mut VecTickSource::new(session()), &mut sink)
        .unwrap();

    let minutes = sink.buckets("1m");
    assert_eq!(minutes.len(), 19);
    for pair in minutes.windows(2) {
        assert_eq!(pair[0].interval_end, pair[1].interval_start);
    }
    assert_eq!(minutes.iter().filter(|b| b.is_empty()).count(), 2);

    let fives = sink.buckets("5m");
    assert_eq!(fives.len(), 3);
    assert_eq!(fives[1].sample_count, minutes[5..10].iter().map(|b| b.sample_count).sum::<u64>());

    assert!(report.accumulation_signals > 0);
    assert!(sink
        .signals()
        .iter()
        .all(|s| s.kind == SignalKind::Accumulation));
    assert_eq!(report.ticks_rejected, 0);
}

#[test]
fn test_jsonl_recording_end_to_end() {
    let mut recording = String::new();
    for (minute, imbalance) in [0.2, 0.0, 0.0, 0.6, 0.4].into_iter().enumerate() {
        for offset in [0, 30_000] {
            let ts = minute as i64 * 60_000 + offset;
            let tick = Tick::new(ts, 5.0 * (1.0 + imbalance), 5.0 * (1.0 - imbalance));
            recording.push_str(&serde_json::to_string(&ReplayRecord::Tick(tick)).unwrap());
            recording.push('\n');
        }
    }
    recording.push_str(r#"{"type":"tick","ts_ms":300000,"bid_volume":1.0,"ask_volume":1.0}"#);
    recording.push('\n');

    let mut config = Config::default();
    config.timeframes.truncate(2);
    let mut runner = ReplayRunner::new(&config).unwrap();
    let mut source = JsonlTickSource::new(Cursor::new(recording), 20);
    let mut sink = RecordingSink::new();

    let report = runner.run(&mut source, &mut sink).unwrap();

    let fives: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Bucket { timeframe, bucket } if timeframe == "5m" => Some(*bucket),
            _ => None,
        })
        .collect();
    assert_eq!(fives.len(), 1);
    assert_abs_diff_eq!(fives[0].avg_imbalance, 0.24, epsilon = 1e-12);
    assert_eq!(report.ticks_ingested, 11);
    assert_eq!(report.buckets_emitted.get("5m"), Some(&1));
}
