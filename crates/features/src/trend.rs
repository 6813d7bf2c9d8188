//! Short-horizon imbalance trend per timeframe.

use flow_core::{Bucket, TrendDirection, TrendSummary};

/// Summarize imbalance drift over `window` (oldest first).
///
/// Needs at least two buckets. Direction is Up or Down when the newest
/// imbalance differs from the oldest by more than `threshold`.
pub fn summarize(timeframe: &str, window: &[Bucket], threshold: f64) -> Option<TrendSummary> {
    let (first, last) = match window {
        [first, .., last] => (first, last),
        _ => return None,
    };
    let prev = &window[window.len() - 2];

    let drift = last.avg_imbalance - first.avg_imbalance;
    let direction = if drift > threshold {
        TrendDirection::Up
    } else if drift < -threshold {
        TrendDirection::Down
    } else {
        TrendDirection::Neutral
    };

    Some(TrendSummary {
        timeframe: timeframe.to_string(),
        direction,
        current_imbalance: last.avg_imbalance,
        imbalance_speed: last.avg_imbalance - prev.avg_imbalance,
        volume_ratio: last.volume_ratio(),
    })
}

/// Shared direction when every summary agrees on Up or Down.
pub fn confluence(summaries: &[TrendSummary]) -> Option<TrendDirection> {
    let first = summaries.first()?.direction;
    if first == TrendDirection::Neutral {
        return None;
    }
    summaries
        .iter()
        .all(|s| s.direction == first)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bucket(i: i64, imbalance: f64, bid: f64, ask: f64) -> Bucket {
        Bucket {
            interval_start: i * 60_000,
            interval_end: (i + 1) * 60_000,
            avg_imbalance: imbalance,
            avg_bid_volume: bid,
            avg_ask_volume: ask,
            sample_count: 4,
        }
    }

    #[test]
    fn test_needs_two_buckets() {
        assert!(summarize("1m", &[], 0.05).is_none());
        assert!(summarize("1m", &[bucket(0, 0.5, 1.0, 1.0)], 0.05).is_none());
    }

    #[test]
    fn test_up_trend() {
        let window = [
            bucket(0, 0.1, 10.0, 10.0),
            bucket(1, 0.15, 10.0, 10.0),
            bucket(2, 0.3, 15.0, 5.0),
        ];

        let trend = summarize("5m", &window, 0.05).unwrap();

        assert_eq!(trend.direction, TrendDirection::Up);
        assert_abs_diff_eq!(trend.current_imbalance, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(trend.imbalance_speed, 0.15, epsilon = 1e-12);
        assert_abs_diff_eq!(trend.volume_ratio, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_drift_is_neutral() {
        let window = [bucket(0, 0.1, 1.0, 0.0), bucket(1, 0.12, 1.0, 0.0)];
        let trend = summarize("1m", &window, 0.05).unwrap();
        assert_eq!(trend.direction, TrendDirection::Neutral);
        assert_eq!(trend.volume_ratio, 1.0);
    }

    #[test]
    fn test_confluence() {
        let up = |tf: &str| TrendSummary {
            timeframe: tf.to_string(),
            direction: TrendDirection::Up,
            current_imbalance: 0.2,
            imbalance_speed: 0.1,
            volume_ratio: 1.5,
        };

        assert_eq!(confluence(&[up("1m"), up("5m")]), Some(TrendDirection::Up));
        assert_eq!(confluence(&[]), None);

        let mut mixed = vec![up("1m"), up("5m")];
        mixed[1].direction = TrendDirection::Down;
        assert_eq!(confluence(&mixed), None);

        let mut flat = vec![up("1m")];
        flat[0].direction = TrendDirection::Neutral;
        assert_eq!(confluence(&flat), None);
    }
}
