use chrono::{DateTime, Utc};
use common::{Direction, EngineError, ExitReason, Position, Result};

use crate::execution::Fill;

/// Single-position cash account for one backtest run.
///
/// Longs pay for the position up front; shorts receive the sale proceeds and
/// carry the buy-back as a liability marked at the current price.
#[derive(Debug)]
pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    position: Option<Position>,
    trades: Vec<Position>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            position: None,
            trades: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Get available cash
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Cash plus the open position marked at `mark`
    pub fn equity(&self, mark: f64) -> f64 {
        self.cash + self.position_value(mark)
    }

    /// Signed market value of the open position
    pub fn position_value(&self, mark: f64) -> f64 {
        self.position
            .as_ref()
            .map(|p| p.direction.sign() * p.size * mark)
            .unwrap_or(0.0)
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn current_position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Closed trades in the order they were closed
    pub fn trades(&self) -> &[Position] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Position> {
        self.trades
    }

    /// Open a new position
    pub fn open_position(
        &mut self,
        direction: Direction,
        fill: Fill,
        timestamp: DateTime<Utc>,
        bar_index: usize,
    ) -> Result<()> {
        if self.position.is_some() {
            return Err(EngineError::PositionAlreadyOpen);
        }

        let notional = fill.price * fill.size;
        match direction {
            Direction::Bullish => {
                let cost = notional + fill.fee;
                if cost > self.cash {
                    return Err(EngineError::InsufficientCash {
                        required: cost,
                        available: self.cash,
                    });
                }
                self.cash -= cost;
            }
            Direction::Bearish => {
                if fill.fee > self.cash {
                    return Err(EngineError::InsufficientCash {
                        required: fill.fee,
                        available: self.cash,
                    });
                }
                self.cash += notional - fill.fee;
            }
        }

        self.position = Some(Position {
            direction,
            size: fill.size,
            entry_time: timestamp,
            entry_index: bar_index,
            entry_price: fill.price,
            exit_time: None,
            exit_index: None,
            exit_price: None,
            exit_reason: None,
            fees: fill.fee,
            pnl: 0.0,
            return_pct: 0.0,
        });

        Ok(())
    }

    /// Close the open position, realize P&L and append it to the trade log
    pub fn close_position(
        &mut self,
        fill: Fill,
        timestamp: DateTime<Utc>,
        bar_index: usize,
        reason: ExitReason,
    ) -> Option<&Position> {
        let mut position = self.position.take()?;

        let notional = fill.price * position.size;
        match position.direction {
            Direction::Bullish => self.cash += notional - fill.fee,
            Direction::Bearish => self.cash -= notional + fill.fee,
        }

        position.fees += fill.fee;
        position.pnl = position.direction.sign()
            * (fill.price - position.entry_price)
            * position.size
            - position.fees;
        let entry_notional = position.entry_price * position.size;
        position.return_pct = if entry_notional > 0.0 {
            position.pnl / entry_notional
        } else {
            0.0
        };
        position.exit_time = Some(timestamp);
        position.exit_index = Some(bar_index);
        position.exit_price = Some(fill.price);
        position.exit_reason = Some(reason);

        self.trades.push(position);
        self.trades.last()
    }
}
