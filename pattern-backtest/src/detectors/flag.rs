use common::{Bar, BarSeries, DetectorKind, Direction, FlagConfig, Signal, SignalMetadata};

use super::make_signal;

/// Impulse leg ending at bar `end`
struct Impulse {
    start: usize,
    end: usize,
    direction: Direction,
    /// Extreme reached by the impulse (top for bullish, bottom for bearish)
    extreme: f64,
    height: f64,
    slope: f64,
    avg_volume: f64,
}

fn impulse_ending_at(bars: &[Bar], end: usize, cfg: &FlagConfig) -> Option<Impulse> {
    let start = end.checked_sub(cfg.impulse_bars)?;
    let leg = &bars[start..=end];

    let base = bars[start].close;
    let change = bars[end].close - base;
    if base <= 0.0 || change == 0.0 || change.abs() / base < cfg.min_impulse_pct {
        return None;
    }

    let top = leg.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let bottom = leg.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    // The leg must finish at its own extreme
    let (direction, extreme) = if change > 0.0 {
        if bars[end].high < top {
            return None;
        }
        (Direction::Bullish, top)
    } else {
        if bars[end].low > bottom {
            return None;
        }
        (Direction::Bearish, bottom)
    };

    let avg_volume = bars[start + 1..=end].iter().map(|b| b.volume).sum::<f64>()
        / cfg.impulse_bars as f64;
    if avg_volume <= 0.0 {
        return None;
    }

    Some(Impulse {
        start,
        end,
        direction,
        extreme,
        height: top - bottom,
        slope: change / cfg.impulse_bars as f64,
        avg_volume,
    })
}

/// Least-squares slope of closes per bar
fn close_slope(bars: &[Bar]) -> f64 {
    let n = bars.len() as f64;
    if bars.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = bars.iter().map(|b| b.close).sum::<f64>() / n;

    let (num, den) = bars.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, b)| {
        let dx = i as f64 - mean_x;
        (num + dx * (b.close - mean_y), den + dx * dx)
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Check the bars after `impulse` up to and including `last` as a flag.
/// Returns (slope, volume ratio, retracement depth fraction).
fn consolidation(
    bars: &[Bar],
    impulse: &Impulse,
    last: usize,
    cfg: &FlagConfig,
) -> Option<(f64, f64, f64)> {
    let body = &bars[impulse.end + 1..=last];
    let max_high = body.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let min_low = body.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    let depth = match impulse.direction {
        Direction::Bullish => {
            if max_high > impulse.extreme {
                return None;
            }
            impulse.extreme - min_low
        }
        Direction::Bearish => {
            if min_low < impulse.extreme {
                return None;
            }
            max_high - impulse.extreme
        }
    };
    let retracement = if impulse.height > 0.0 { depth / impulse.height } else { 1.0 };
    if retracement > cfg.max_retracement {
        return None;
    }

    let slope = close_slope(body);
    if slope.abs() > cfg.max_slope_ratio * impulse.slope.abs() {
        return None;
    }

    let avg_volume = body.iter().map(|b| b.volume).sum::<f64>() / body.len() as f64;
    let volume_ratio = avg_volume / impulse.avg_volume;
    if volume_ratio >= cfg.volume_contraction_ratio {
        return None;
    }

    Some((slope, volume_ratio, retracement))
}

/// Flags are emitted on the bar that completes the shortest valid
/// consolidation. Each impulse must end after the previous flag's last bar.
pub fn scan(series: &BarSeries, cfg: &FlagConfig) -> Vec<Signal> {
    let bars = series.bars();
    let mut signals = Vec::new();
    let mut last_flag_end: Option<usize> = None;

    for last in 0..bars.len() {
        // Shortest consolidation first: latest impulse end first
        let earliest_end = last.saturating_sub(cfg.max_consolidation_bars);
        let Some(latest_end) = last.checked_sub(cfg.min_consolidation_bars) else {
            continue;
        };

        let found = (earliest_end..=latest_end)
            .rev()
            .filter(|&end| last_flag_end.map_or(true, |prev| end > prev))
            .filter_map(|end| impulse_ending_at(bars, end, cfg))
            .find_map(|imp| consolidation(bars, &imp, last, cfg).map(|c| (imp, c)));

        let Some((impulse, (slope, volume_ratio, retracement))) = found else {
            continue;
        };

        let strength = 0.5 * (1.0 - retracement / cfg.max_retracement.max(f64::EPSILON))
            + 0.5 * (1.0 - volume_ratio / cfg.volume_contraction_ratio.max(f64::EPSILON));

        signals.push(make_signal(
            DetectorKind::Flag,
            series,
            last,
            impulse.direction,
            strength,
            SignalMetadata::Flag {
                impulse_start: impulse.start,
                impulse_end: impulse.end,
                consolidation_bars: last - impulse.end,
                impulse_height: impulse.height,
                consolidation_slope: slope,
                volume_ratio,
            },
        ));
        last_flag_end = Some(last);
    }

    signals
}
