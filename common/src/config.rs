use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::DetectorKind;

fn require_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(EngineError::invalid_config(format!("{name} must be > 0")));
    }
    Ok(())
}

fn require_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(EngineError::invalid_config(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> Result<()> {
    if value < 0.0 || !value.is_finite() {
        return Err(EngineError::invalid_config(format!(
            "{name} must be >= 0, got {value}"
        )));
    }
    Ok(())
}

/// Lookback periods for the shared indicator set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub sma_period: usize,
    pub ema_period: usize,
    /// Window of the volume average used by the flag detector
    pub volume_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            atr_period: 14,
            sma_period: 20,
            ema_period: 20,
            volume_period: 20,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        require_positive("indicators.rsi_period", self.rsi_period)?;
        require_positive("indicators.atr_period", self.atr_period)?;
        require_positive("indicators.sma_period", self.sma_period)?;
        require_positive("indicators.ema_period", self.ema_period)?;
        require_positive("indicators.volume_period", self.volume_period)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Bars required on each side of a pivot
    pub window: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self { window: 2 }
    }
}

impl SwingConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("swing.window", self.window)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiDivergenceConfig {
    pub pivot_window: usize,
    /// Minimum bars between the two pivots of a pair
    pub min_bars_between: usize,
    /// Maximum bars between the two pivots of a pair
    pub lookback: usize,
    /// RSI is sampled at the price pivot +/- this many bars
    pub pivot_tolerance: usize,
    pub include_hidden: bool,
    /// RSI gap (in points) that maps to full strength
    pub rsi_gap_norm: f64,
}

impl Default for RsiDivergenceConfig {
    fn default() -> Self {
        Self {
            pivot_window: 2,
            min_bars_between: 5,
            lookback: 30,
            pivot_tolerance: 1,
            include_hidden: true,
            rsi_gap_norm: 20.0,
        }
    }
}

impl RsiDivergenceConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("rsi_divergence.pivot_window", self.pivot_window)?;
        require_positive("rsi_divergence.lookback", self.lookback)?;
        if self.min_bars_between > self.lookback {
            return Err(EngineError::invalid_config(
                "rsi_divergence.min_bars_between must not exceed lookback",
            ));
        }
        if self.rsi_gap_norm <= 0.0 {
            return Err(EngineError::invalid_config(
                "rsi_divergence.rsi_gap_norm must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    /// Length of the impulse leg in bars
    pub impulse_bars: usize,
    /// Minimum impulse move as a fraction of the starting close
    pub min_impulse_pct: f64,
    pub min_consolidation_bars: usize,
    pub max_consolidation_bars: usize,
    /// Max consolidation slope per bar, relative to impulse slope per bar
    pub max_slope_ratio: f64,
    /// Max depth of the consolidation as a fraction of impulse height
    pub max_retracement: f64,
    /// Consolidation volume must average below this share of impulse volume
    pub volume_contraction_ratio: f64,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            impulse_bars: 5,
            min_impulse_pct: 0.03,
            min_consolidation_bars: 3,
            max_consolidation_bars: 15,
            max_slope_ratio: 0.5,
            max_retracement: 0.5,
            volume_contraction_ratio: 0.8,
        }
    }
}

impl FlagConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("flag.impulse_bars", self.impulse_bars)?;
        require_positive("flag.min_consolidation_bars", self.min_consolidation_bars)?;
        if self.max_consolidation_bars < self.min_consolidation_bars {
            return Err(EngineError::invalid_config(
                "flag.max_consolidation_bars must be >= min_consolidation_bars",
            ));
        }
        require_non_negative("flag.min_impulse_pct", self.min_impulse_pct)?;
        require_non_negative("flag.max_slope_ratio", self.max_slope_ratio)?;
        require_fraction("flag.max_retracement", self.max_retracement)?;
        require_non_negative("flag.volume_contraction_ratio", self.volume_contraction_ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBlockConfig {
    /// Bars in the displacement move following the block candle
    pub displacement_bars: usize,
    /// Displacement must exceed this multiple of ATR
    pub displacement_atr_multiple: f64,
    /// How far back from the displacement to look for the opposing candle
    pub lookback: usize,
}

impl Default for OrderBlockConfig {
    fn default() -> Self {
        Self {
            displacement_bars: 3,
            displacement_atr_multiple: 1.5,
            lookback: 10,
        }
    }
}

impl OrderBlockConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("order_block.displacement_bars", self.displacement_bars)?;
        require_positive("order_block.lookback", self.lookback)?;
        if self.displacement_atr_multiple <= 0.0 {
            return Err(EngineError::invalid_config(
                "order_block.displacement_atr_multiple must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairValueGapConfig {
    /// Minimum gap size as a fraction of the middle bar's close
    pub min_gap_pct: f64,
    /// Gap size (fraction of price) that maps to full strength
    pub full_strength_gap_pct: f64,
}

impl Default for FairValueGapConfig {
    fn default() -> Self {
        Self {
            min_gap_pct: 0.0,
            full_strength_gap_pct: 0.01,
        }
    }
}

impl FairValueGapConfig {
    pub fn validate(&self) -> Result<()> {
        require_non_negative("fair_value_gap.min_gap_pct", self.min_gap_pct)?;
        if self.full_strength_gap_pct <= 0.0 {
            return Err(EngineError::invalid_config(
                "fair_value_gap.full_strength_gap_pct must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChochConfig {
    /// Pivot window of the swing structure the break is measured against
    pub swing_window: usize,
    /// Breaks use the close (true) or the wick (false)
    pub close_confirmation: bool,
}

impl Default for ChochConfig {
    fn default() -> Self {
        Self {
            swing_window: 2,
            close_confirmation: true,
        }
    }
}

impl ChochConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("choch.swing_window", self.swing_window)
    }
}

/// Swing failure: a wick through a swing level that closes back inside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingFailureConfig {
    pub swing_window: usize,
    /// Minimum overshoot beyond the level, as a fraction of it
    pub breach_pct: f64,
    /// Bars after the breach bar in which a close back inside still counts
    pub max_confirmation_bars: usize,
}

impl Default for SwingFailureConfig {
    fn default() -> Self {
        Self {
            swing_window: 2,
            breach_pct: 0.0002,
            max_confirmation_bars: 2,
        }
    }
}

impl SwingFailureConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("swing_failure.swing_window", self.swing_window)?;
        require_non_negative("swing_failure.breach_pct", self.breach_pct)
    }
}

/// Which detectors run and how each is tuned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enabled: Vec<DetectorKind>,
    pub swing: SwingConfig,
    pub rsi_divergence: RsiDivergenceConfig,
    pub flag: FlagConfig,
    pub order_block: OrderBlockConfig,
    pub fair_value_gap: FairValueGapConfig,
    pub choch: ChochConfig,
    pub swing_failure: SwingFailureConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: DetectorKind::ALL.to_vec(),
            swing: SwingConfig::default(),
            rsi_divergence: RsiDivergenceConfig::default(),
            flag: FlagConfig::default(),
            order_block: OrderBlockConfig::default(),
            fair_value_gap: FairValueGapConfig::default(),
            choch: ChochConfig::default(),
            swing_failure: SwingFailureConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn only(kinds: &[DetectorKind]) -> Self {
        Self {
            enabled: kinds.to_vec(),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self, kind: DetectorKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn validate(&self) -> Result<()> {
        self.swing.validate()?;
        self.rsi_divergence.validate()?;
        self.flag.validate()?;
        self.order_block.validate()?;
        self.fair_value_gap.validate()?;
        self.choch.validate()?;
        self.swing_failure.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorWeights {
    pub swing: f64,
    pub rsi_divergence: f64,
    pub flag: f64,
    pub order_block: f64,
    pub fair_value_gap: f64,
    pub choch: f64,
    pub swing_failure: f64,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            swing: 0.5,
            rsi_divergence: 1.0,
            flag: 1.0,
            order_block: 1.0,
            fair_value_gap: 1.0,
            choch: 1.0,
            swing_failure: 1.0,
        }
    }
}

impl DetectorWeights {
    pub fn weight(&self, kind: DetectorKind) -> f64 {
        match kind {
            DetectorKind::Swing => self.swing,
            DetectorKind::RsiDivergence => self.rsi_divergence,
            DetectorKind::Flag => self.flag,
            DetectorKind::OrderBlock => self.order_block,
            DetectorKind::FairValueGap => self.fair_value_gap,
            DetectorKind::ChangeOfCharacter => self.choch,
            DetectorKind::SwingFailure => self.swing_failure,
        }
    }
}

/// Confluence scoring and entry threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub weights: DetectorWeights,
    /// Composite score must strictly exceed this to emit
    pub threshold: f64,
    /// Minimum number of agreeing detectors
    pub min_signals: usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            weights: DetectorWeights::default(),
            threshold: 0.3,
            min_signals: 2,
        }
    }
}

impl ConfluenceConfig {
    pub fn validate(&self) -> Result<()> {
        require_fraction("confluence.threshold", self.threshold)?;
        for kind in DetectorKind::ALL {
            require_non_negative(
                &format!("confluence.weights.{}", kind.name()),
                self.weights.weight(kind),
            )?;
        }
        Ok(())
    }
}

/// Fee charged on each fill
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostModel {
    /// Flat amount per fill
    Fixed { per_trade: f64 },
    /// Fraction of fill notional
    Proportional { rate: f64 },
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel::Proportional { rate: 0.001 }
    }
}

impl CostModel {
    pub fn fee(&self, notional: f64) -> f64 {
        match *self {
            CostModel::Fixed { per_trade } => per_trade,
            CostModel::Proportional { rate } => notional.abs() * rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            CostModel::Fixed { per_trade } => require_non_negative("risk.fee.per_trade", per_trade),
            CostModel::Proportional { rate } => require_fraction("risk.fee.rate", rate),
        }
    }
}

/// Position sizing and exit rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub initial_capital: f64,
    /// Fraction of equity committed per entry
    pub position_size_pct: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub max_hold_bars: Option<usize>,
    /// Signal-reversal exits wait this many bars; stop/target do not
    pub min_hold_bars: usize,
    pub allow_short: bool,
    pub fee: CostModel,
    pub slippage_pct: f64,
    pub periods_per_year: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            position_size_pct: 0.1,
            stop_loss_pct: Some(0.02),
            take_profit_pct: Some(0.04),
            trailing_stop_pct: None,
            max_hold_bars: Some(50),
            min_hold_bars: 0,
            allow_short: true,
            fee: CostModel::default(),
            slippage_pct: 0.0005,
            periods_per_year: 252.0,
        }
    }
}

impl RiskConfig {
    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_position_size(mut self, pct: f64) -> Self {
        self.position_size_pct = pct;
        self
    }

    pub fn with_stop_loss(mut self, pct: Option<f64>) -> Self {
        self.stop_loss_pct = pct;
        self
    }

    pub fn with_take_profit(mut self, pct: Option<f64>) -> Self {
        self.take_profit_pct = pct;
        self
    }

    pub fn with_trailing_stop(mut self, pct: Option<f64>) -> Self {
        self.trailing_stop_pct = pct;
        self
    }

    pub fn with_max_hold(mut self, bars: Option<usize>) -> Self {
        self.max_hold_bars = bars;
        self
    }

    pub fn with_costs(mut self, fee: CostModel, slippage_pct: f64) -> Self {
        self.fee = fee;
        self.slippage_pct = slippage_pct;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= 0.0 || !self.initial_capital.is_finite() {
            return Err(EngineError::invalid_config("risk.initial_capital must be > 0"));
        }
        if self.position_size_pct <= 0.0 || self.position_size_pct > 1.0 {
            return Err(EngineError::invalid_config(
                "risk.position_size_pct must be within (0, 1]",
            ));
        }
        for (name, value) in [
            ("risk.stop_loss_pct", self.stop_loss_pct),
            ("risk.take_profit_pct", self.take_profit_pct),
            ("risk.trailing_stop_pct", self.trailing_stop_pct),
        ] {
            if let Some(v) = value {
                if v <= 0.0 || v >= 1.0 {
                    return Err(EngineError::invalid_config(format!(
                        "{name} must be within (0, 1), got {v}"
                    )));
                }
            }
        }
        if self.max_hold_bars == Some(0) {
            return Err(EngineError::invalid_config("risk.max_hold_bars must be > 0"));
        }
        require_fraction("risk.slippage_pct", self.slippage_pct)?;
        if self.periods_per_year <= 0.0 {
            return Err(EngineError::invalid_config("risk.periods_per_year must be > 0"));
        }
        self.fee.validate()
    }
}

/// A complete, self-contained strategy definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub id: String,
    pub indicators: IndicatorParams,
    pub detectors: DetectorConfig,
    pub confluence: ConfluenceConfig,
    pub risk: RiskConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            indicators: IndicatorParams::default(),
            detectors: DetectorConfig::default(),
            confluence: ConfluenceConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl StrategyConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_detectors(mut self, detectors: DetectorConfig) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_confluence(mut self, confluence: ConfluenceConfig) -> Self {
        self.confluence = confluence;
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_indicators(mut self, indicators: IndicatorParams) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::invalid_config("strategy id must not be empty"));
        }
        self.indicators.validate()?;
        self.detectors.validate()?;
        self.confluence.validate()?;
        self.risk.validate()
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Whole-batch deadline; unfinished jobs are reported as timed out
    pub batch_timeout_ms: Option<u64>,
    /// Per-job limit; a job running longer is recorded as a timeout failure
    pub job_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_timeout_ms: None,
            job_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("scheduler.workers", self.workers)?;
        if self.batch_timeout_ms == Some(0) || self.job_timeout_ms == Some(0) {
            return Err(EngineError::invalid_config("scheduler timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub strategies: Vec<StrategyConfig>,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn strategy(&self, id: &str) -> Option<&StrategyConfig> {
        self.strategies.iter().find(|s| s.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        for (i, strategy) in self.strategies.iter().enumerate() {
            strategy.validate()?;
            if self.strategies[..i].iter().any(|s| s.id == strategy.id) {
                return Err(EngineError::invalid_config(format!(
                    "duplicate strategy id '{}'",
                    strategy.id
                )));
            }
        }
        Ok(())
    }
}
