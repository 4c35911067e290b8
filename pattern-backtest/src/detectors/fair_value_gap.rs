use common::{
    BarSeries, DetectorKind, Direction, FairValueGapConfig, Signal, SignalMetadata, ZoneBounds,
};

use super::make_signal;

/// Three-bar imbalance, emitted on the third bar.
///
/// Bullish when the first bar's high is below the third bar's low; the gap is
/// `[high[i-2], low[i]]`. Bearish mirrors it with `[high[i], low[i-2]]`.
pub fn scan(series: &BarSeries, cfg: &FairValueGapConfig) -> Vec<Signal> {
    let bars = series.bars();
    let mut signals = Vec::new();

    for i in 2..bars.len() {
        let (first, middle, third) = (&bars[i - 2], &bars[i - 1], &bars[i]);

        let gap = if first.high < third.low {
            Some((Direction::Bullish, first.high, third.low))
        } else if first.low > third.high {
            Some((Direction::Bearish, third.high, first.low))
        } else {
            None
        };
        let Some((direction, low, high)) = gap else {
            continue;
        };

        let size_pct = if middle.close > 0.0 {
            (high - low) / middle.close
        } else {
            0.0
        };
        if size_pct < cfg.min_gap_pct {
            continue;
        }

        signals.push(make_signal(
            DetectorKind::FairValueGap,
            series,
            i,
            direction,
            size_pct / cfg.full_strength_gap_pct,
            SignalMetadata::Zone {
                bounds: ZoneBounds { low, high },
                origin_index: i - 1,
            },
        ));
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::Bar;

    fn series(rows: &[(f64, f64, f64, f64)]) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = rows
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Bar::new(start + Duration::days(i as i64), o, h, l, c, 100.0))
            .collect();
        BarSeries::new("GAP", "1D", bars).unwrap()
    }

    #[test]
    fn test_bearish_gap_bounds() {
        let s = series(&[
            (110.0, 112.0, 108.0, 109.0),
            (109.0, 109.5, 100.0, 101.0),
            (101.0, 104.0, 99.0, 100.0),
        ]);

        let signals = scan(&s, &FairValueGapConfig::default());

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, Direction::Bearish);
        let zone = signals[0].metadata.zone().unwrap();
        assert_eq!(zone.low, 104.0);
        assert_eq!(zone.high, 108.0);
    }

    #[test]
    fn test_touching_bars_are_not_a_gap() {
        let s = series(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 102.0, 100.0, 101.5),
            (101.5, 103.0, 101.0, 102.5),
        ]);
        assert!(scan(&s, &FairValueGapConfig::default()).is_empty());
    }

    #[test]
    fn test_min_gap_filters_small_gaps() {
        let s = series(&[
            (100.0, 100.0, 99.0, 99.5),
            (99.5, 101.0, 99.4, 100.9),
            (100.9, 101.5, 100.1, 101.2),
        ]);
        let cfg = FairValueGapConfig {
            min_gap_pct: 0.01,
            ..Default::default()
        };
        assert!(scan(&s, &cfg).is_empty());
        assert_eq!(scan(&s, &FairValueGapConfig::default()).len(), 1);
    }
}
