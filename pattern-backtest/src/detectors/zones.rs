use common::{Bar, BarSeries, DetectorKind, Direction, Signal, ZoneBounds};
use serde::{Deserialize, Serialize};

/// Order-block or fair-value-gap zone with its invalidation bar, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedZone {
    pub signal: Signal,
    pub bounds: ZoneBounds,
    pub created_at: usize,
    pub invalidated_at: Option<usize>,
}

impl TrackedZone {
    /// True when the zone exists and is still intact at bar `index`.
    pub fn is_active_at(&self, index: usize) -> bool {
        index >= self.created_at && self.invalidated_at.map_or(true, |end| index < end)
    }
}

fn invalidates(kind: DetectorKind, direction: Direction, bounds: &ZoneBounds, bar: &Bar) -> bool {
    match (kind, direction) {
        // Order blocks die on a close through the zone
        (DetectorKind::OrderBlock, Direction::Bullish) => bar.close < bounds.low,
        (DetectorKind::OrderBlock, Direction::Bearish) => bar.close > bounds.high,
        // Gaps die once price trades through the whole gap
        (DetectorKind::FairValueGap, Direction::Bullish) => bar.low <= bounds.low,
        (DetectorKind::FairValueGap, Direction::Bearish) => bar.high >= bounds.high,
        _ => false,
    }
}

/// Follow every zone signal forward and record the first later bar that
/// invalidates it. Signals without a zone are ignored.
pub fn track_zones(series: &BarSeries, signals: &[Signal]) -> Vec<TrackedZone> {
    let bars = series.bars();

    signals
        .iter()
        .filter_map(|signal| {
            let bounds = signal.metadata.zone()?;
            let invalidated_at = (signal.bar_index + 1..bars.len())
                .find(|&i| invalidates(signal.detector, signal.direction, &bounds, &bars[i]));

            Some(TrackedZone {
                signal: signal.clone(),
                bounds,
                created_at: signal.bar_index,
                invalidated_at,
            })
        })
        .collect()
}
