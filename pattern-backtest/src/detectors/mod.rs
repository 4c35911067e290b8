//! Pattern detectors.
//!
//! Every detector is causal: a signal at `bar_index = i` is derived from bars
//! `0..=i` only, so scanning a prefix of a series yields exactly the prefix of
//! the full scan's signals.

pub mod choch;
pub mod fair_value_gap;
pub mod flag;
pub mod order_block;
pub mod rsi_divergence;
pub mod swing;
pub mod swing_failure;
pub mod zones;

pub use zones::{track_zones, TrackedZone};

use common::{
    BarSeries, ChochConfig, DetectorConfig, DetectorKind, Direction, FairValueGapConfig,
    FlagConfig, OrderBlockConfig, Result, RsiDivergenceConfig, Signal, SignalMetadata,
    SwingConfig, SwingFailureConfig,
};

use crate::indicators::Indicators;

/// Closed set of detectors sharing one scan contract
#[derive(Debug, Clone, PartialEq)]
pub enum Detector {
    Swing(SwingConfig),
    RsiDivergence(RsiDivergenceConfig),
    Flag(FlagConfig),
    OrderBlock(OrderBlockConfig),
    FairValueGap(FairValueGapConfig),
    ChangeOfCharacter(ChochConfig),
    SwingFailure(SwingFailureConfig),
}

impl Detector {
    pub fn from_config(kind: DetectorKind, config: &DetectorConfig) -> Self {
        match kind {
            DetectorKind::Swing => Detector::Swing(config.swing.clone()),
            DetectorKind::RsiDivergence => Detector::RsiDivergence(config.rsi_divergence.clone()),
            DetectorKind::Flag => Detector::Flag(config.flag.clone()),
            DetectorKind::OrderBlock => Detector::OrderBlock(config.order_block.clone()),
            DetectorKind::FairValueGap => Detector::FairValueGap(config.fair_value_gap.clone()),
            DetectorKind::ChangeOfCharacter => {
                Detector::ChangeOfCharacter(config.choch.clone())
            }
            DetectorKind::SwingFailure => Detector::SwingFailure(config.swing_failure.clone()),
        }
    }

    /// Enabled detectors in canonical kind order, each at most once
    pub fn enabled(config: &DetectorConfig) -> Vec<Detector> {
        DetectorKind::ALL
            .iter()
            .filter(|kind| config.is_enabled(**kind))
            .map(|kind| Detector::from_config(*kind, config))
            .collect()
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Detector::Swing(_) => DetectorKind::Swing,
            Detector::RsiDivergence(_) => DetectorKind::RsiDivergence,
            Detector::Flag(_) => DetectorKind::Flag,
            Detector::OrderBlock(_) => DetectorKind::OrderBlock,
            Detector::FairValueGap(_) => DetectorKind::FairValueGap,
            Detector::ChangeOfCharacter(_) => DetectorKind::ChangeOfCharacter,
            Detector::SwingFailure(_) => DetectorKind::SwingFailure,
        }
    }

    /// Swing window this detector reads pivots for, if any
    pub fn pivot_window(&self) -> Option<usize> {
        match self {
            Detector::Swing(cfg) => Some(cfg.window),
            Detector::RsiDivergence(cfg) => Some(cfg.pivot_window),
            Detector::ChangeOfCharacter(cfg) => Some(cfg.swing_window),
            Detector::SwingFailure(cfg) => Some(cfg.swing_window),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Detector::Swing(cfg) => cfg.validate(),
            Detector::RsiDivergence(cfg) => cfg.validate(),
            Detector::Flag(cfg) => cfg.validate(),
            Detector::OrderBlock(cfg) => cfg.validate(),
            Detector::FairValueGap(cfg) => cfg.validate(),
            Detector::ChangeOfCharacter(cfg) => cfg.validate(),
            Detector::SwingFailure(cfg) => cfg.validate(),
        }
    }

    /// Scan the whole series and return signals ordered by bar index.
    ///
    /// Fails only on invalid configuration; short or featureless data gives
    /// an empty result.
    pub fn scan(&self, series: &BarSeries, indicators: &Indicators) -> Result<Vec<Signal>> {
        self.validate()?;
        if series.is_empty() {
            return Ok(Vec::new());
        }

        let mut signals = match self {
            Detector::Swing(cfg) => swing::scan(series, indicators, cfg)?,
            Detector::RsiDivergence(cfg) => rsi_divergence::scan(series, indicators, cfg)?,
            Detector::Flag(cfg) => flag::scan(series, cfg),
            Detector::OrderBlock(cfg) => order_block::scan(series, indicators, cfg),
            Detector::FairValueGap(cfg) => fair_value_gap::scan(series, cfg),
            Detector::ChangeOfCharacter(cfg) => choch::scan(series, indicators, cfg)?,
            Detector::SwingFailure(cfg) => swing_failure::scan(series, indicators, cfg)?,
        };
        signals.sort_by_key(|s| s.bar_index);
        Ok(signals)
    }
}

pub(crate) fn make_signal(
    detector: DetectorKind,
    series: &BarSeries,
    bar_index: usize,
    direction: Direction,
    strength: f64,
    metadata: SignalMetadata,
) -> Signal {
    Signal {
        detector,
        symbol: series.symbol().to_string(),
        timeframe: series.timeframe().to_string(),
        timestamp: series.bars()[bar_index].timestamp,
        bar_index,
        direction,
        strength: unit(strength),
        metadata,
    }
}

/// Clamp to [0, 1], mapping NaN to 0
pub(crate) fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
