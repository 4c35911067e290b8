use common::{
    BarSeries, ChochConfig, DetectorKind, Direction, Result, Signal, SignalMetadata, SwingKind,
};

use super::make_signal;
use crate::indicators::{Indicators, Pivot};

/// Walk the bars tracking the latest unbroken swing high and swing low.
///
/// Breaking a swing sets the trend. A break against an established trend is a
/// change of character and is emitted on the breaking bar; the first break
/// only establishes the trend.
pub fn scan(series: &BarSeries, indicators: &Indicators, cfg: &ChochConfig) -> Result<Vec<Signal>> {
    let pivots = indicators.pivots(series, cfg.swing_window)?;
    let bars = series.bars();

    let mut signals = Vec::new();
    let mut trend: Option<Direction> = None;
    let mut swing_high: Option<Pivot> = None;
    let mut swing_low: Option<Pivot> = None;
    let mut next_pivot = 0;

    for (i, bar) in bars.iter().enumerate() {
        while let Some(p) = pivots.get(next_pivot).filter(|p| p.confirmed_at <= i) {
            match p.kind {
                SwingKind::High => swing_high = Some(*p),
                SwingKind::Low => swing_low = Some(*p),
            }
            next_pivot += 1;
        }

        let (up_probe, down_probe) = if cfg.close_confirmation {
            (bar.close, bar.close)
        } else {
            (bar.high, bar.low)
        };

        let breaks = [
            (Direction::Bullish, swing_high.filter(|s| up_probe > s.price), up_probe),
            (Direction::Bearish, swing_low.filter(|s| down_probe < s.price), down_probe),
        ];

        for (direction, broken, probe) in breaks {
            let Some(level) = broken else {
                continue;
            };

            if trend == Some(direction.opposite()) {
                let strength = match indicators.atr_at(i) {
                    Some(atr) if atr > 0.0 => (probe - level.price).abs() / atr,
                    _ => 0.5,
                };
                signals.push(make_signal(
                    DetectorKind::ChangeOfCharacter,
                    series,
                    i,
                    direction,
                    strength,
                    SignalMetadata::ChangeOfCharacter {
                        broken_level: level.price,
                        swing_index: level.index,
                    },
                ));
            }

            trend = Some(direction);
            match direction {
                Direction::Bullish => swing_high = None,
                Direction::Bearish => swing_low = None,
            }
        }
    }

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::bars_from_closes;
    use common::IndicatorParams;

    fn scan_closes(closes: &[f64]) -> Vec<Signal> {
        let series = bars_from_closes("CH", "1D", closes, 0.1, 1000.0).unwrap();
        let indicators = Indicators::compute(&series, &IndicatorParams::default(), &[2]).unwrap();
        scan(&series, &indicators, &ChochConfig::default()).unwrap()
    }

    #[test]
    fn test_downtrend_then_break_of_lower_high() {
        // Lower highs and lower lows, then a rally through the last swing high
        let closes = [
            110.0, 108.0, 106.0, 104.0, 106.0, 107.0, 105.0, 103.0, 101.0, 99.0, 101.0, 102.0,
            100.0, 98.0, 96.0, 94.0, 96.0, 98.0, 100.0, 103.0, 105.0,
        ];

        let signals = scan_closes(&closes);

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Bullish);
        match signal.metadata {
            SignalMetadata::ChangeOfCharacter { swing_index, .. } => assert_eq!(swing_index, 11),
            _ => panic!("wrong metadata"),
        }
    }

    #[test]
    fn test_first_break_only_sets_trend() {
        let closes = [100.0, 102.0, 104.0, 102.0, 100.0, 101.0, 103.0, 105.0, 107.0];
        assert!(scan_closes(&closes).is_empty());
    }
}
