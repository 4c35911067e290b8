//! Deterministic fill model
//!
//! Every fill pays proportional slippage against the trader plus the
//! configured fee. Identical inputs always produce identical fills.

use common::{CostModel, Direction, RiskConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn to_open(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Side::Buy,
            Direction::Bearish => Side::Sell,
        }
    }

    pub fn to_close(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Side::Sell,
            Direction::Bearish => Side::Buy,
        }
    }
}

/// Result of an execution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    /// Price moved against the trader by slippage
    pub slippage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillModel {
    slippage_pct: f64,
    fee: CostModel,
}

impl FillModel {
    pub fn new(slippage_pct: f64, fee: CostModel) -> Self {
        Self { slippage_pct, fee }
    }

    pub fn from_risk(risk: &RiskConfig) -> Self {
        Self::new(risk.slippage_pct, risk.fee)
    }

    /// Price after slippage: buys fill higher, sells lower
    pub fn fill_price(&self, side: Side, reference: f64) -> f64 {
        match side {
            Side::Buy => reference * (1.0 + self.slippage_pct),
            Side::Sell => reference * (1.0 - self.slippage_pct),
        }
    }

    pub fn execute(&self, side: Side, reference: f64, size: f64) -> Fill {
        let price = self.fill_price(side, reference);
        Fill {
            price,
            size,
            fee: self.fee.fee(price * size),
            slippage: (price - reference).abs(),
        }
    }

    /// Largest size a long entry can afford with `cash`, fee included
    pub fn affordable_size(&self, side: Side, reference: f64, cash: f64) -> f64 {
        let price = self.fill_price(side, reference);
        if price <= 0.0 {
            return 0.0;
        }
        let notional = match self.fee {
            CostModel::Fixed { per_trade } => cash - per_trade,
            CostModel::Proportional { rate } => cash / (1.0 + rate),
        };
        (notional / price).max(0.0)
    }
}
