use common::{EquityPoint, PerformanceMetrics, Position};

/// Calculate performance metrics from equity curve and trades
pub struct MetricsCalculator;

/// Headline numbers of a run
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub metrics: PerformanceMetrics,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|r| (r - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

impl MetricsCalculator {
    /// Calculate all performance metrics
    pub fn calculate(
        equity_curve: &[EquityPoint],
        trades: &[Position],
        initial_equity: f64,
        periods_per_year: f64,
    ) -> Summary {
        let final_equity = equity_curve.last().map(|(_, e)| *e).unwrap_or(initial_equity);
        let total_return = if initial_equity > 0.0 {
            finite_or_zero(final_equity / initial_equity - 1.0)
        } else {
            0.0
        };

        let returns = Self::period_returns(equity_curve);
        let (max_drawdown, max_dd_duration) = Self::max_drawdown(equity_curve);
        let stats = TradeStats::from_trades(trades);

        Summary {
            total_return,
            sharpe_ratio: Self::sharpe_ratio(&returns, periods_per_year),
            max_drawdown,
            win_rate: Self::win_rate(trades),
            metrics: PerformanceMetrics {
                volatility: finite_or_zero(std_dev(&returns) * periods_per_year.sqrt()),
                sortino_ratio: Self::sortino_ratio(&returns, periods_per_year),
                var_95: Self::value_at_risk(
                    &trades.iter().map(|t| t.return_pct).collect::<Vec<_>>(),
                    0.95,
                ),
                profit_factor: stats.profit_factor,
                avg_trade_return: stats.avg_return,
                winning_trades: stats.winning,
                losing_trades: stats.losing,
                max_consecutive_losses: stats.max_consecutive_losses,
                max_drawdown_duration_bars: max_dd_duration,
            },
        }
    }

    /// Simple returns between consecutive equity points
    pub fn period_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .map(|w| {
                let prev = w[0].1;
                let curr = w[1].1;
                if prev != 0.0 {
                    (curr - prev) / prev
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Annualized Sharpe ratio (zero risk-free rate).
    ///
    /// Returns 0 for an empty or zero-variance series and never NaN or Inf.
    pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
        let sd = std_dev(returns);
        if returns.is_empty() || sd <= f64::EPSILON {
            return 0.0;
        }
        finite_or_zero(mean(returns) / sd * periods_per_year.sqrt())
    }

    /// Like Sharpe but only penalizes downside deviation
    pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let downside = (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>()
            / returns.len() as f64)
            .sqrt();
        if downside <= f64::EPSILON {
            return 0.0;
        }
        finite_or_zero(mean(returns) / downside * periods_per_year.sqrt())
    }

    /// Largest peak-to-trough decline as a fraction of the peak, and the
    /// number of bars from that peak to the trough.
    pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
        let Some(first) = equity_curve.first() else {
            return (0.0, 0);
        };

        let mut peak = first.1;
        let mut peak_index = 0;
        let mut max_drawdown = 0.0;
        let mut duration = 0;

        for (i, (_, equity)) in equity_curve.iter().enumerate() {
            if *equity > peak {
                peak = *equity;
                peak_index = i;
            }
            let drawdown = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                duration = i - peak_index;
            }
        }

        (max_drawdown, duration)
    }

    /// Drawdown fraction at every point of the curve
    pub fn drawdown_curve(equity_curve: &[EquityPoint]) -> Vec<EquityPoint> {
        let mut peak = f64::NEG_INFINITY;
        equity_curve
            .iter()
            .map(|(ts, equity)| {
                peak = peak.max(*equity);
                let drawdown = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
                (*ts, drawdown)
            })
            .collect()
    }

    /// Winning trades over all trades; 0 without trades
    pub fn win_rate(trades: &[Position]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }
        trades.iter().filter(|t| t.pnl > 0.0).count() as f64 / trades.len() as f64
    }

    /// Historical VaR: the loss quantile of `returns` at `confidence`
    pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let mut sorted = returns.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let tail = ((1.0 - confidence) * sorted.len() as f64).floor() as usize;
        let idx = tail.min(sorted.len() - 1);
        sorted[idx]
    }
}

#[derive(Debug, Default)]
struct TradeStats {
    winning: usize,
    losing: usize,
    profit_factor: Option<f64>,
    avg_return: f64,
    max_consecutive_losses: usize,
}

impl TradeStats {
    fn from_trades(trades: &[Position]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let mut stats = TradeStats::default();
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        let mut streak = 0;

        for trade in trades {
            if trade.pnl > 0.0 {
                stats.winning += 1;
                gross_win += trade.pnl;
                streak = 0;
            } else if trade.pnl < 0.0 {
                stats.losing += 1;
                gross_loss += trade.pnl.abs();
                streak += 1;
                stats.max_consecutive_losses = stats.max_consecutive_losses.max(streak);
            } else {
                streak = 0;
            }
        }

        stats.profit_factor = (gross_loss > 0.0).then(|| gross_win / gross_loss);
        stats.avg_return = mean(&trades.iter().map(|t| t.return_pct).collect::<Vec<_>>());
        stats
    }
}
