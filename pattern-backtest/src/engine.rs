use std::collections::HashMap;
use std::time::Instant;

use common::{
    BacktestResult, BacktestRun, Bar, BarSeries, ConfluenceSignal, Direction, EngineError,
    EquityPoint, ExitReason, Result, RiskConfig, StrategyConfig,
};
use tracing::{debug, info, trace};

use crate::execution::{FillModel, Side};
use crate::metrics::MetricsCalculator;
use crate::portfolio::Portfolio;
use crate::scanner::Scanner;

/// Per-run simulation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    InPosition,
    Closing,
    Done,
}

/// Causal replay of one series through the detectors, confluence engine and
/// risk rules of a single strategy
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    strategy: StrategyConfig,
    scanner: Scanner,
}

impl BacktestEngine {
    pub fn new(strategy: StrategyConfig) -> Result<Self> {
        let scanner = Scanner::new(&strategy)?;
        Ok(Self { strategy, scanner })
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.strategy
    }

    /// Run backtest on the series.
    ///
    /// Detectors only look backwards, so scanning the whole series up front
    /// and replaying the signals bar by bar sees exactly what a bar-by-bar
    /// scan would.
    pub fn run(&self, series: &BarSeries) -> Result<BacktestRun> {
        let start_time = Instant::now();

        let (first, last) = match (series.first(), series.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => {
                return Err(EngineError::EmptyData {
                    symbol: series.symbol().to_string(),
                    timeframe: series.timeframe().to_string(),
                })
            }
        };

        let report = self.scanner.scan(series)?;
        let by_bar: HashMap<usize, &ConfluenceSignal> =
            report.confluence.iter().map(|c| (c.bar_index, c)).collect();

        let risk = &self.strategy.risk;
        let mut sim = Simulation::new(risk);
        for (i, bar) in series.bars().iter().enumerate() {
            sim.step(i, bar, by_bar.get(&i).copied());
        }
        sim.finish(series);

        let Simulation {
            portfolio,
            equity_curve,
            ..
        } = sim;
        let trades = portfolio.into_trades();

        let summary = MetricsCalculator::calculate(
            &equity_curve,
            &trades,
            risk.initial_capital,
            risk.periods_per_year,
        );
        let drawdown_curve = MetricsCalculator::drawdown_curve(&equity_curve);
        let final_equity = equity_curve
            .last()
            .map(|(_, e)| *e)
            .unwrap_or(risk.initial_capital);

        let result = BacktestResult {
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe().to_string(),
            strategy_id: self.strategy.id.clone(),
            total_return: summary.total_return,
            sharpe_ratio: summary.sharpe_ratio,
            max_drawdown: summary.max_drawdown,
            win_rate: summary.win_rate,
            trade_count: trades.len(),
            equity_curve,
            drawdown_curve,
            trades,
            metrics: summary.metrics,
            initial_equity: risk.initial_capital,
            final_equity,
            start: first,
            end: last,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            symbol = %result.symbol,
            timeframe = %result.timeframe,
            strategy = %result.strategy_id,
            trades = result.trade_count,
            total_return = result.total_return,
            "backtest finished"
        );

        Ok(BacktestRun {
            result,
            signals: report.signals,
            confluence: report.confluence,
        })
    }
}

/// Mutable state of a single run
struct Simulation<'a> {
    risk: &'a RiskConfig,
    fills: FillModel,
    portfolio: Portfolio,
    state: EngineState,
    stop: Option<f64>,
    target: Option<f64>,
    equity_curve: Vec<EquityPoint>,
}

impl<'a> Simulation<'a> {
    fn new(risk: &'a RiskConfig) -> Self {
        Self {
            risk,
            fills: FillModel::from_risk(risk),
            portfolio: Portfolio::new(risk.initial_capital),
            state: EngineState::Idle,
            stop: None,
            target: None,
            equity_curve: Vec::new(),
        }
    }

    fn transition(&mut self, next: EngineState, index: usize) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, bar = index, "state transition");
            self.state = next;
        }
    }

    fn step(&mut self, index: usize, bar: &Bar, confluence: Option<&ConfluenceSignal>) {
        if self.portfolio.has_position() {
            if let Some((reason, price)) = self.exit_rule(index, bar, confluence) {
                self.transition(EngineState::Closing, index);
                self.close(index, bar, reason, price);
                self.transition(EngineState::Idle, index);
            } else {
                self.trail(bar);
            }
        } else {
            self.transition(EngineState::Scanning, index);
            if let Some(signal) = confluence {
                self.enter(index, bar, signal);
            }
            let next = if self.portfolio.has_position() {
                EngineState::InPosition
            } else {
                EngineState::Idle
            };
            self.transition(next, index);
        }

        self.equity_curve
            .push((bar.timestamp, self.portfolio.equity(bar.close)));
    }

    /// First matching exit: stop, target, signal reversal, max holding
    fn exit_rule(
        &self,
        index: usize,
        bar: &Bar,
        confluence: Option<&ConfluenceSignal>,
    ) -> Option<(ExitReason, f64)> {
        let position = self.portfolio.current_position()?;
        let direction = position.direction;
        let held = position.bars_held(index);

        if let Some(stop) = self.stop {
            match direction {
                Direction::Bullish if bar.low <= stop => {
                    return Some((ExitReason::Stop, bar.open.min(stop)))
                }
                Direction::Bearish if bar.high >= stop => {
                    return Some((ExitReason::Stop, bar.open.max(stop)))
                }
                _ => {}
            }
        }

        if let Some(target) = self.target {
            match direction {
                Direction::Bullish if bar.high >= target => {
                    return Some((ExitReason::Target, bar.open.max(target)))
                }
                Direction::Bearish if bar.low <= target => {
                    return Some((ExitReason::Target, bar.open.min(target)))
                }
                _ => {}
            }
        }

        if let Some(signal) = confluence {
            if signal.direction == direction.opposite() && held >= self.risk.min_hold_bars {
                return Some((ExitReason::SignalReversal, bar.close));
            }
        }

        match self.risk.max_hold_bars {
            Some(max) if held >= max => Some((ExitReason::MaxHolding, bar.close)),
            _ => None,
        }
    }

    fn trail(&mut self, bar: &Bar) {
        let (Some(trail), Some(position)) =
            (self.risk.trailing_stop_pct, self.portfolio.current_position())
        else {
            return;
        };

        self.stop = Some(match (position.direction, self.stop) {
            (Direction::Bullish, Some(stop)) => stop.max(bar.high * (1.0 - trail)),
            (Direction::Bullish, None) => bar.high * (1.0 - trail),
            (Direction::Bearish, Some(stop)) => stop.min(bar.low * (1.0 + trail)),
            (Direction::Bearish, None) => bar.low * (1.0 + trail),
        });
    }

    fn enter(&mut self, index: usize, bar: &Bar, signal: &ConfluenceSignal) {
        let direction = signal.direction;
        if direction == Direction::Bearish && !self.risk.allow_short {
            debug!(bar = index, "short entry skipped");
            return;
        }

        let side = Side::to_open(direction);
        let price = self.fills.fill_price(side, bar.close);
        let budget = self.portfolio.equity(bar.close) * self.risk.position_size_pct;
        let affordable = self
            .fills
            .affordable_size(side, bar.close, self.portfolio.cash());
        let size = (budget / price).min(affordable);
        if size.is_nan() || size <= 0.0 {
            debug!(bar = index, "entry skipped, nothing affordable");
            return;
        }

        let fill = self.fills.execute(side, bar.close, size);
        if let Err(err) = self
            .portfolio
            .open_position(direction, fill, bar.timestamp, index)
        {
            debug!(bar = index, %err, "entry rejected");
            return;
        }

        let sign = direction.sign();
        self.stop = self.risk.stop_loss_pct.map(|pct| fill.price * (1.0 - sign * pct));
        self.target = self
            .risk
            .take_profit_pct
            .map(|pct| fill.price * (1.0 + sign * pct));
        self.trail(bar);
    }

    fn close(&mut self, index: usize, bar: &Bar, reason: ExitReason, reference: f64) {
        let Some(position) = self.portfolio.current_position() else {
            return;
        };
        let fill = self
            .fills
            .execute(Side::to_close(position.direction), reference, position.size);
        if let Some(trade) = self
            .portfolio
            .close_position(fill, bar.timestamp, index, reason)
        {
            trace!(bar = index, reason = ?reason, pnl = trade.pnl, "position closed");
        }
        self.stop = None;
        self.target = None;
    }

    /// Data exhausted: force-close at the last close
    fn finish(&mut self, series: &BarSeries) {
        let Some(last) = series.last() else {
            return;
        };
        let index = series.len() - 1;

        if self.portfolio.has_position() {
            self.transition(EngineState::Closing, index);
            self.close(index, last, ExitReason::EndOfData, last.close);
            if let Some(point) = self.equity_curve.last_mut() {
                point.1 = self.portfolio.equity(last.close);
            }
        }
        self.transition(EngineState::Done, index);
    }
}
