use std::collections::{BTreeMap, BTreeSet};

use common::{ConfluenceConfig, ConfluenceSignal, DetectorKind, Direction, Result, Signal};

/// Weighted vote of detectors that fired on the same bar
#[derive(Debug, Clone)]
pub struct ConfluenceEngine {
    config: ConfluenceConfig,
    total_weight: f64,
}

impl ConfluenceEngine {
    /// `enabled` fixes the normalizer: the score is the agreeing weight over
    /// the weight of every enabled detector, so it is comparable across bars.
    pub fn new(config: ConfluenceConfig, enabled: &[DetectorKind]) -> Result<Self> {
        config.validate()?;
        let kinds: BTreeSet<DetectorKind> = enabled.iter().copied().collect();
        let total_weight = kinds.iter().map(|k| config.weights.weight(*k)).sum();
        Ok(Self {
            config,
            total_weight,
        })
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    /// Score the signals of a single bar.
    ///
    /// Each detector votes once per direction. Equal bullish and bearish
    /// weight is neutral and yields nothing.
    pub fn score(&self, signals: &[&Signal]) -> Option<ConfluenceSignal> {
        let first = signals.first()?;
        if self.total_weight <= 0.0 {
            return None;
        }

        let voters = |direction: Direction| -> BTreeSet<DetectorKind> {
            signals
                .iter()
                .filter(|s| s.direction == direction)
                .map(|s| s.detector)
                .collect()
        };
        let bulls = voters(Direction::Bullish);
        let bears = voters(Direction::Bearish);

        let weight_of = |kinds: &BTreeSet<DetectorKind>| -> f64 {
            kinds.iter().map(|k| self.config.weights.weight(*k)).sum()
        };
        let bull_weight = weight_of(&bulls);
        let bear_weight = weight_of(&bears);

        let (direction, weight, count) = if bull_weight > bear_weight {
            (Direction::Bullish, bull_weight, bulls.len())
        } else if bear_weight > bull_weight {
            (Direction::Bearish, bear_weight, bears.len())
        } else {
            return None;
        };

        let composite_score = (weight / self.total_weight).min(1.0);
        if count < self.config.min_signals || composite_score <= self.config.threshold {
            return None;
        }

        // One contributor per voting detector, its strongest signal
        let mut strongest: BTreeMap<DetectorKind, &Signal> = BTreeMap::new();
        for signal in signals.iter().copied().filter(|s| s.direction == direction) {
            strongest
                .entry(signal.detector)
                .and_modify(|kept| {
                    if signal.strength > kept.strength {
                        *kept = signal;
                    }
                })
                .or_insert(signal);
        }

        Some(ConfluenceSignal {
            symbol: first.symbol.clone(),
            timeframe: first.timeframe.clone(),
            timestamp: first.timestamp,
            bar_index: first.bar_index,
            direction,
            contributing_signals: strongest.into_values().cloned().collect(),
            composite_score,
        })
    }

    /// Group signals by bar and score each bar, in bar order
    pub fn aggregate(&self, signals: &[Signal]) -> Vec<ConfluenceSignal> {
        let mut by_bar: BTreeMap<usize, Vec<&Signal>> = BTreeMap::new();
        for signal in signals {
            by_bar.entry(signal.bar_index).or_default().push(signal);
        }

        by_bar
            .values()
            .filter_map(|bar_signals| self.score(bar_signals))
            .collect()
    }
}
