use common::{
    BarSeries, DetectorKind, Direction, Result, Signal, SignalMetadata, SwingConfig, SwingKind,
};

use super::make_signal;
use crate::indicators::Indicators;

/// Emit each pivot at its confirmation bar. A swing high reads bearish, a
/// swing low bullish. Strength is the pivot's prominence over its window in
/// ATR units.
pub fn scan(series: &BarSeries, indicators: &Indicators, cfg: &SwingConfig) -> Result<Vec<Signal>> {
    let pivots = indicators.pivots(series, cfg.window)?;
    let bars = series.bars();

    let signals = pivots
        .iter()
        .map(|p| {
            let window = p.index - cfg.window..=p.index + cfg.window;
            let (direction, prominence) = match p.kind {
                SwingKind::High => {
                    let next = window
                        .filter(|&j| j != p.index)
                        .map(|j| bars[j].high)
                        .fold(f64::NEG_INFINITY, f64::max);
                    (Direction::Bearish, p.price - next)
                }
                SwingKind::Low => {
                    let next = window
                        .filter(|&j| j != p.index)
                        .map(|j| bars[j].low)
                        .fold(f64::INFINITY, f64::min);
                    (Direction::Bullish, next - p.price)
                }
            };

            let strength = match indicators.atr_at(p.confirmed_at) {
                Some(atr) if atr > 0.0 => prominence / atr,
                _ => 0.5,
            };

            make_signal(
                DetectorKind::Swing,
                series,
                p.confirmed_at,
                direction,
                strength,
                SignalMetadata::Swing {
                    kind: p.kind,
                    pivot_index: p.index,
                    pivot_price: p.price,
                },
            )
        })
        .collect();

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_v_shape;
    use common::IndicatorParams;

    #[test]
    fn test_v_bottom_is_single_bullish_swing() {
        let series = generate_v_shape("V", "1D", 100.0, 1.0, 8).unwrap();
        let indicators = Indicators::compute(&series, &IndicatorParams::default(), &[2]).unwrap();

        let signals = scan(&series, &indicators, &SwingConfig { window: 2 }).unwrap();

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, Direction::Bullish);
        assert_eq!(signals[0].bar_index, 10);
        assert!(matches!(
            signals[0].metadata,
            SignalMetadata::Swing {
                kind: SwingKind::Low,
                pivot_index: 8,
                ..
            }
        ));
    }
}
