use common::{
    BarSeries, DetectorKind, Direction, Result, Signal, SignalMetadata, SwingFailureConfig,
    SwingKind,
};

use super::make_signal;
use crate::indicators::{Indicators, Pivot};

/// A swept swing level waiting for a close back inside
#[derive(Debug, Clone, Copy)]
struct Sweep {
    pivot: Pivot,
    breach_index: usize,
    extreme: f64,
}

/// Find swing failure patterns on confirmed pivots.
///
/// A bar whose wick overshoots the latest swing high by at least
/// `breach_pct` sweeps it. If a close lands back below the level on the
/// breach bar or within `max_confirmation_bars` after it, a bearish signal
/// is emitted on that closing bar. Otherwise the sweep lapses as a genuine
/// breakout. Swing lows mirror this. Each swing is swept at most once.
pub fn scan(
    series: &BarSeries,
    indicators: &Indicators,
    cfg: &SwingFailureConfig,
) -> Result<Vec<Signal>> {
    let pivots = indicators.pivots(series, cfg.swing_window)?;
    let bars = series.bars();

    let mut signals = Vec::new();
    let mut swing_high: Option<Pivot> = None;
    let mut swing_low: Option<Pivot> = None;
    let mut high_sweep: Option<Sweep> = None;
    let mut low_sweep: Option<Sweep> = None;
    let mut next_pivot = 0;

    for (i, bar) in bars.iter().enumerate() {
        while let Some(p) = pivots.get(next_pivot).filter(|p| p.confirmed_at <= i) {
            match p.kind {
                SwingKind::High => swing_high = Some(*p),
                SwingKind::Low => swing_low = Some(*p),
            }
            next_pivot += 1;
        }

        if high_sweep.is_none() {
            let breached = swing_high.filter(|s| bar.high >= s.price * (1.0 + cfg.breach_pct));
            if let Some(level) = breached {
                swing_high = None;
                high_sweep = Some(Sweep {
                    pivot: level,
                    breach_index: i,
                    extreme: bar.high,
                });
            }
        }
        if low_sweep.is_none() {
            let breached = swing_low.filter(|s| bar.low <= s.price * (1.0 - cfg.breach_pct));
            if let Some(level) = breached {
                swing_low = None;
                low_sweep = Some(Sweep {
                    pivot: level,
                    breach_index: i,
                    extreme: bar.low,
                });
            }
        }

        if let Some(sweep) = high_sweep.as_mut() {
            sweep.extreme = sweep.extreme.max(bar.high);
            if bar.close < sweep.pivot.price {
                signals.push(failure_signal(series, indicators, i, Direction::Bearish, sweep));
                high_sweep = None;
            } else if i >= sweep.breach_index + cfg.max_confirmation_bars {
                high_sweep = None;
            }
        }
        if let Some(sweep) = low_sweep.as_mut() {
            sweep.extreme = sweep.extreme.min(bar.low);
            if bar.close > sweep.pivot.price {
                signals.push(failure_signal(series, indicators, i, Direction::Bullish, sweep));
                low_sweep = None;
            } else if i >= sweep.breach_index + cfg.max_confirmation_bars {
                low_sweep = None;
            }
        }
    }

    Ok(signals)
}

fn failure_signal(
    series: &BarSeries,
    indicators: &Indicators,
    index: usize,
    direction: Direction,
    sweep: &Sweep,
) -> Signal {
    let overshoot = (sweep.extreme - sweep.pivot.price).abs();
    let strength = match indicators.atr_at(index) {
        Some(atr) if atr > 0.0 => 0.5 + overshoot / atr,
        _ => 0.5,
    };

    make_signal(
        DetectorKind::SwingFailure,
        series,
        index,
        direction,
        strength,
        SignalMetadata::SwingFailure {
            swept_level: sweep.pivot.price,
            swing_index: sweep.pivot.index,
            breach_index: sweep.breach_index,
            extreme: sweep.extreme,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{Bar, IndicatorParams};

    fn series(rows: &[(f64, f64, f64, f64)]) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let bars = rows
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                Bar::new(start + Duration::days(i as i64), o, h, l, c, 500.0)
            })
            .collect();
        BarSeries::new("SFP", "1D", bars).unwrap()
    }

    fn scan_rows(rows: &[(f64, f64, f64, f64)]) -> Vec<Signal> {
        let series = series(rows);
        let indicators = Indicators::compute(&series, &IndicatorParams::default(), &[2]).unwrap();
        scan(&series, &indicators, &SwingFailureConfig::default()).unwrap()
    }

    // Swing high of 105 at bar 2, confirmed at bar 4
    const RALLY: [(f64, f64, f64, f64); 6] = [
        (100.0, 101.0, 99.0, 100.0),
        (100.0, 102.0, 99.5, 101.5),
        (101.5, 105.0, 101.0, 104.0),
        (104.0, 104.5, 102.0, 103.0),
        (103.0, 103.5, 101.0, 102.0),
        (102.0, 103.0, 101.5, 102.5),
    ];

    #[test]
    fn test_wick_above_high_closing_back_inside() {
        let mut rows = RALLY.to_vec();
        rows.push((102.5, 106.0, 102.0, 104.5));
        rows.push((104.5, 105.0, 103.0, 103.5));

        let signals = scan_rows(&rows);

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Bearish);
        assert_eq!(signal.bar_index, 6);
        match signal.metadata {
            SignalMetadata::SwingFailure {
                swept_level,
                swing_index,
                breach_index,
                extreme,
            } => {
                assert_eq!(swept_level, 105.0);
                assert_eq!(swing_index, 2);
                assert_eq!(breach_index, 6);
                assert_eq!(extreme, 106.0);
            }
            ref other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn test_acceptance_above_high_is_a_breakout() {
        let mut rows = RALLY.to_vec();
        rows.push((102.5, 106.5, 102.0, 106.0));
        rows.push((106.0, 107.0, 105.5, 106.8));
        rows.push((106.8, 108.0, 106.5, 107.5));

        assert!(scan_rows(&rows).is_empty());
    }

    #[test]
    fn test_sweep_of_low_reclaimed_next_bar() {
        // Swing low of 95 at bar 2; bar 6 closes below it, bar 7 reclaims
        let rows = [
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 100.5, 98.0, 98.5),
            (98.5, 99.0, 95.0, 96.0),
            (96.0, 98.0, 95.5, 97.5),
            (97.5, 99.0, 96.0, 98.5),
            (98.5, 99.0, 96.5, 97.0),
            (97.0, 97.5, 94.0, 94.5),
            (94.5, 96.5, 94.2, 96.0),
            (96.0, 97.0, 95.8, 96.8),
        ];

        let signals = scan_rows(&rows);

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.bar_index, 7);
        match signal.metadata {
            SignalMetadata::SwingFailure {
                swing_index,
                breach_index,
                extreme,
                ..
            } => {
                assert_eq!(swing_index, 2);
                assert_eq!(breach_index, 6);
                assert_eq!(extreme, 94.0);
            }
            ref other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn test_overshoot_below_breach_pct_is_ignored() {
        let mut rows = RALLY.to_vec();
        rows.push((102.5, 105.01, 102.0, 104.5));

        assert!(scan_rows(&rows).is_empty());
    }
}
