use std::collections::HashSet;

use common::{
    BarSeries, DetectorKind, Direction, OrderBlockConfig, Signal, SignalMetadata, ZoneBounds,
};

use super::make_signal;
use crate::indicators::Indicators;

/// Find displacements of `displacement_bars` same-direction candles moving at
/// least `displacement_atr_multiple` ATRs, then mark the last opposing candle
/// before the move as the block. Emitted on the bar that completes the
/// displacement; each candle becomes a block at most once per direction.
pub fn scan(series: &BarSeries, indicators: &Indicators, cfg: &OrderBlockConfig) -> Vec<Signal> {
    let bars = series.bars();
    let mut signals = Vec::new();
    let mut used: HashSet<(usize, Direction)> = HashSet::new();

    for end in cfg.displacement_bars..bars.len() {
        let Some(atr) = indicators.atr_at(end).filter(|a| *a > 0.0) else {
            continue;
        };

        let first = end + 1 - cfg.displacement_bars;
        let leg = &bars[first..=end];
        let moved = bars[end].close - bars[first].open;

        let direction = if leg.iter().all(|b| b.is_bullish()) {
            Direction::Bullish
        } else if leg.iter().all(|b| b.is_bearish()) {
            Direction::Bearish
        } else {
            continue;
        };
        if moved.abs() < cfg.displacement_atr_multiple * atr {
            continue;
        }

        let floor = first.saturating_sub(cfg.lookback);
        let block = (floor..first).rev().find(|&j| match direction {
            Direction::Bullish => bars[j].is_bearish(),
            Direction::Bearish => bars[j].is_bullish(),
        });
        let Some(block) = block else {
            continue;
        };
        if !used.insert((block, direction)) {
            continue;
        }

        let strength = moved.abs() / (2.0 * cfg.displacement_atr_multiple * atr);
        signals.push(make_signal(
            DetectorKind::OrderBlock,
            series,
            end,
            direction,
            strength,
            SignalMetadata::Zone {
                bounds: ZoneBounds {
                    low: bars[block].low,
                    high: bars[block].high,
                },
                origin_index: block,
            },
        ));
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{Bar, IndicatorParams};

    fn bar(i: i64, open: f64, close: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Bar::new(
            start + Duration::days(i),
            open,
            open.max(close) + 0.2,
            open.min(close) - 0.2,
            close,
            1000.0,
        )
    }

    fn bullish_block_series() -> BarSeries {
        let mut bars = Vec::new();
        // Quiet alternating chop, range about 1
        for i in 0..10 {
            let (o, c) = if i % 2 == 0 { (100.0, 100.5) } else { (100.5, 100.0) };
            bars.push(bar(i, o, c));
        }
        // Last down candle, then a three-bar displacement up
        bars.push(bar(10, 100.5, 99.5));
        bars.push(bar(11, 99.6, 101.5));
        bars.push(bar(12, 101.5, 103.5));
        bars.push(bar(13, 103.5, 105.5));
        bars.push(bar(14, 105.5, 106.0));
        BarSeries::new("OB", "1D", bars).unwrap()
    }

    #[test]
    fn test_bullish_block_at_last_down_candle() {
        let series = bullish_block_series();
        let params = IndicatorParams {
            atr_period: 5,
            ..Default::default()
        };
        let indicators = Indicators::compute(&series, &params, &[]).unwrap();

        let signals = scan(&series, &indicators, &OrderBlockConfig::default());

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.bar_index, 13);
        let zone = signal.metadata.zone().unwrap();
        assert!((zone.low - 99.3).abs() < 1e-9);
        assert!((zone.high - 100.7).abs() < 1e-9);
    }

    #[test]
    fn test_choppy_series_has_no_block() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                if i % 2 == 0 {
                    bar(i, 100.0, 100.5)
                } else {
                    bar(i, 100.5, 100.0)
                }
            })
            .collect();
        let series = BarSeries::new("OB", "1D", bars).unwrap();
        let indicators = Indicators::compute(&series, &IndicatorParams::default(), &[]).unwrap();

        assert!(scan(&series, &indicators, &OrderBlockConfig::default()).is_empty());
    }
}
