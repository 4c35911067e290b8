use common::{
    BarSeries, DetectorKind, Direction, DivergenceKind, Result, RsiDivergenceConfig, Signal,
    SignalMetadata, SwingKind,
};

use super::make_signal;
use crate::indicators::{Indicators, Pivot};

/// RSI read at a price pivot: the extreme within `pivot_tolerance` bars,
/// never past the pivot's confirmation bar.
fn rsi_at_pivot(indicators: &Indicators, pivot: &Pivot, tolerance: usize) -> Option<f64> {
    let from = pivot.index.saturating_sub(tolerance);
    let to = (pivot.index + tolerance).min(pivot.confirmed_at);

    let values = (from..=to).filter_map(|j| indicators.rsi_at(j));
    match pivot.kind {
        SwingKind::High => values.reduce(f64::max),
        SwingKind::Low => values.reduce(f64::min),
    }
}

fn classify(
    kind: SwingKind,
    prior: (f64, f64),
    current: (f64, f64),
) -> Option<(Direction, DivergenceKind)> {
    let (prior_price, prior_rsi) = prior;
    let (price, rsi) = current;

    match kind {
        SwingKind::High if price > prior_price && rsi < prior_rsi => {
            Some((Direction::Bearish, DivergenceKind::Regular))
        }
        SwingKind::High if price < prior_price && rsi > prior_rsi => {
            Some((Direction::Bearish, DivergenceKind::Hidden))
        }
        SwingKind::Low if price < prior_price && rsi > prior_rsi => {
            Some((Direction::Bullish, DivergenceKind::Regular))
        }
        SwingKind::Low if price > prior_price && rsi < prior_rsi => {
            Some((Direction::Bullish, DivergenceKind::Hidden))
        }
        _ => None,
    }
}

/// Compare each new price pivot with the most recent earlier pivot of the
/// same kind that lies within `[min_bars_between, lookback]` bars and has an
/// RSI reading. Only that pair is considered.
pub fn scan(
    series: &BarSeries,
    indicators: &Indicators,
    cfg: &RsiDivergenceConfig,
) -> Result<Vec<Signal>> {
    let pivots = indicators.pivots(series, cfg.pivot_window)?;
    let mut signals = Vec::new();

    for (pos, pivot) in pivots.iter().enumerate() {
        let Some(rsi) = rsi_at_pivot(indicators, pivot, cfg.pivot_tolerance) else {
            continue;
        };

        let prior = pivots[..pos]
            .iter()
            .rev()
            .filter(|q| q.kind == pivot.kind)
            .take_while(|q| pivot.index - q.index <= cfg.lookback)
            .filter(|q| pivot.index - q.index >= cfg.min_bars_between)
            .find_map(|q| rsi_at_pivot(indicators, q, cfg.pivot_tolerance).map(|r| (q, r)));

        let Some((prior, prior_rsi)) = prior else {
            continue;
        };

        let Some((direction, kind)) =
            classify(pivot.kind, (prior.price, prior_rsi), (pivot.price, rsi))
        else {
            continue;
        };
        if kind == DivergenceKind::Hidden && !cfg.include_hidden {
            continue;
        }

        signals.push(make_signal(
            DetectorKind::RsiDivergence,
            series,
            pivot.confirmed_at,
            direction,
            (rsi - prior_rsi).abs() / cfg.rsi_gap_norm,
            SignalMetadata::Divergence {
                kind,
                prior_pivot_index: prior.index,
                pivot_index: pivot.index,
                prior_price: prior.price,
                price: pivot.price,
                prior_rsi,
                rsi,
            },
        ));
    }

    Ok(signals)
}
