use common::{BacktestResult, BarSeries, EngineError, Result, StrategyConfig};
use rayon::prelude::*;
use tracing::info;

use crate::engine::BacktestEngine;

/// Risk and confluence values to cross with each other
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGrid {
    pub stop_loss_pct: Vec<Option<f64>>,
    pub take_profit_pct: Vec<Option<f64>>,
    pub confluence_threshold: Vec<f64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            stop_loss_pct: vec![Some(0.01), Some(0.02), Some(0.03)],
            take_profit_pct: vec![Some(0.02), Some(0.04), Some(0.06)],
            confluence_threshold: vec![0.2, 0.3, 0.4],
        }
    }
}

impl ParameterGrid {
    pub fn len(&self) -> usize {
        self.stop_loss_pct.len() * self.take_profit_pct.len() * self.confluence_threshold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One strategy per grid point, ids derived from the base id
    pub fn variants(&self, base: &StrategyConfig) -> Vec<StrategyConfig> {
        let pct = |v: Option<f64>| v.map_or("none".to_string(), |v| format!("{v}"));

        let mut out = Vec::with_capacity(self.len());
        for &stop in &self.stop_loss_pct {
            for &target in &self.take_profit_pct {
                for &threshold in &self.confluence_threshold {
                    let mut strategy = base.clone();
                    strategy.id = format!(
                        "{}/sl={}/tp={}/th={}",
                        base.id,
                        pct(stop),
                        pct(target),
                        threshold
                    );
                    strategy.risk.stop_loss_pct = stop;
                    strategy.risk.take_profit_pct = target;
                    strategy.confluence.threshold = threshold;
                    out.push(strategy);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub strategy: StrategyConfig,
    pub result: BacktestResult,
    /// `sharpe_ratio * total_return`
    pub score: f64,
}

pub struct Optimizer {
    grid: ParameterGrid,
}

impl Optimizer {
    pub fn new(grid: ParameterGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    /// Backtest every variant of `base` on `series` in parallel, best first
    pub fn optimize(
        &self,
        base: &StrategyConfig,
        series: &BarSeries,
    ) -> Result<Vec<OptimizationResult>> {
        if self.grid.is_empty() {
            return Err(EngineError::invalid_config(
                "parameter grid has an empty dimension",
            ));
        }

        let mut ranked = self
            .grid
            .variants(base)
            .into_par_iter()
            .map(|strategy| {
                let run = BacktestEngine::new(strategy.clone())?.run(series)?;
                let result = run.result;
                let score = result.sharpe_ratio * result.total_return;
                Ok(OptimizationResult {
                    strategy,
                    result,
                    score: if score.is_finite() { score } else { 0.0 },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.strategy.id.cmp(&b.strategy.id))
        });

        if let Some(best) = ranked.first() {
            info!(
                symbol = series.symbol(),
                variants = ranked.len(),
                best = %best.strategy.id,
                score = best.score,
                "optimization finished"
            );
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_random_walk;

    #[test]
    fn test_variants_cover_grid() {
        let grid = ParameterGrid {
            stop_loss_pct: vec![Some(0.01), None],
            take_profit_pct: vec![Some(0.05)],
            confluence_threshold: vec![0.2, 0.5],
        };
        let variants = grid.variants(&StrategyConfig::new("base"));

        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0].id, "base/sl=0.01/tp=0.05/th=0.2");
        assert_eq!(variants[3].risk.stop_loss_pct, None);
        assert_eq!(variants[3].confluence.threshold, 0.5);
    }

    #[test]
    fn test_ranked_best_first() {
        let series = generate_random_walk("SPY", "1D", 300, 100.0, 11).unwrap();
        let grid = ParameterGrid {
            stop_loss_pct: vec![Some(0.01), Some(0.03)],
            take_profit_pct: vec![Some(0.02), Some(0.06)],
            confluence_threshold: vec![0.2],
        };

        let ranked = Optimizer::new(grid)
            .optimize(&StrategyConfig::default(), &series)
            .unwrap();

        assert_eq!(ranked.len(), 4);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_empty_dimension_rejected() {
        let grid = ParameterGrid {
            confluence_threshold: vec![],
            ..Default::default()
        };
        let series = generate_random_walk("SPY", "1D", 50, 100.0, 1).unwrap();
        assert!(Optimizer::new(grid)
            .optimize(&StrategyConfig::default(), &series)
            .is_err());
    }
}
