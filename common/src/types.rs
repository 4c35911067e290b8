use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, FailureKind, Result};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Ordered bars for one (symbol, timeframe).
///
/// Timestamps are strictly increasing. Gaps are allowed, reordering and
/// duplicates are rejected at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedSeries")]
pub struct BarSeries {
    symbol: String,
    timeframe: String,
    bars: Vec<Bar>,
}

#[derive(Deserialize)]
struct UncheckedSeries {
    symbol: String,
    timeframe: String,
    bars: Vec<Bar>,
}

impl TryFrom<UncheckedSeries> for BarSeries {
    type Error = EngineError;

    fn try_from(raw: UncheckedSeries) -> Result<Self> {
        BarSeries::new(raw.symbol, raw.timeframe, raw.bars)
    }
}

impl BarSeries {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        bars: Vec<Bar>,
    ) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            let values = [bar.open, bar.high, bar.low, bar.close, bar.volume];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::MalformedSeries {
                    index: i,
                    reason: "non-finite price or volume".to_string(),
                });
            }
            if bar.high < bar.low {
                return Err(EngineError::MalformedSeries {
                    index: i,
                    reason: format!("high {} below low {}", bar.high, bar.low),
                });
            }
            if bar.volume < 0.0 {
                return Err(EngineError::MalformedSeries {
                    index: i,
                    reason: "negative volume".to_string(),
                });
            }
            if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                return Err(EngineError::MalformedSeries {
                    index: i,
                    reason: format!(
                        "timestamp {} does not follow {}",
                        bar.timestamp,
                        bars[i - 1].timestamp
                    ),
                });
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars,
        })
    }

    pub fn empty(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.open).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// First `len` bars, as seen by a replay standing at bar `len - 1`.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            bars: self.bars[..len.min(self.bars.len())].to_vec(),
        }
    }

    /// Bars whose timestamp falls inside `range`.
    pub fn within(&self, range: &DateRange) -> Self {
        Self {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            bars: self
                .bars
                .iter()
                .filter(|b| range.contains(b.timestamp))
                .cloned()
                .collect(),
        }
    }
}

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    /// +1 for long exposure, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }
}

/// Closed set of pattern detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Swing,
    RsiDivergence,
    Flag,
    OrderBlock,
    FairValueGap,
    ChangeOfCharacter,
    SwingFailure,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 7] = [
        DetectorKind::Swing,
        DetectorKind::RsiDivergence,
        DetectorKind::Flag,
        DetectorKind::OrderBlock,
        DetectorKind::FairValueGap,
        DetectorKind::ChangeOfCharacter,
        DetectorKind::SwingFailure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Swing => "swing",
            DetectorKind::RsiDivergence => "rsi_divergence",
            DetectorKind::Flag => "flag",
            DetectorKind::OrderBlock => "order_block",
            DetectorKind::FairValueGap => "fair_value_gap",
            DetectorKind::ChangeOfCharacter => "choch",
            DetectorKind::SwingFailure => "swing_failure",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceKind {
    Regular,
    Hidden,
}

/// Price zone, `low <= high`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBounds {
    pub low: f64,
    pub high: f64,
}

/// Pattern-specific signal fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum SignalMetadata {
    Swing {
        kind: SwingKind,
        pivot_index: usize,
        pivot_price: f64,
    },
    Divergence {
        kind: DivergenceKind,
        prior_pivot_index: usize,
        pivot_index: usize,
        prior_price: f64,
        price: f64,
        prior_rsi: f64,
        rsi: f64,
    },
    Flag {
        impulse_start: usize,
        impulse_end: usize,
        consolidation_bars: usize,
        impulse_height: f64,
        consolidation_slope: f64,
        volume_ratio: f64,
    },
    Zone {
        bounds: ZoneBounds,
        origin_index: usize,
    },
    ChangeOfCharacter {
        broken_level: f64,
        swing_index: usize,
    },
    /// Swing level swept by a wick and reclaimed by a close
    SwingFailure {
        swept_level: f64,
        swing_index: usize,
        breach_index: usize,
        /// Furthest price reached beyond the level
        extreme: f64,
    },
}

impl SignalMetadata {
    pub fn zone(&self) -> Option<ZoneBounds> {
        match self {
            SignalMetadata::Zone { bounds, .. } => Some(*bounds),
            _ => None,
        }
    }
}

/// Event emitted by one detector at one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub detector: DetectorKind,
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub bar_index: usize,
    pub direction: Direction,
    /// Confidence in [0, 1]
    pub strength: f64,
    pub metadata: SignalMetadata,
}

/// Agreement of several detectors at one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceSignal {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub bar_index: usize,
    pub direction: Direction,
    /// Strongest agreeing signal of each voting detector
    pub contributing_signals: Vec<Signal>,
    /// Weighted share of agreeing detectors, in [0, 1]
    pub composite_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    Target,
    Stop,
    SignalReversal,
    MaxHolding,
    EndOfData,
}

/// Position information; exit fields are set once it is closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub size: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_index: usize,
    pub entry_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    pub fees: f64,
    /// Realized P&L net of fees, zero while open
    pub pnl: f64,
    /// Realized P&L over entry notional
    pub return_pct: f64,
}

impl Position {
    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.direction.sign() * (mark - self.entry_price) * self.size
    }

    pub fn bars_held(&self, current_index: usize) -> usize {
        current_index.saturating_sub(self.entry_index)
    }
}

pub type EquityPoint = (DateTime<Utc>, f64);

/// Secondary performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Annualized stdev of period returns
    pub volatility: f64,
    pub sortino_ratio: f64,
    /// 5th percentile of per-trade returns
    pub var_95: f64,
    /// Gross wins over gross losses; `None` when there are no losses
    pub profit_factor: Option<f64>,
    pub avg_trade_return: f64,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub max_consecutive_losses: usize,
    pub max_drawdown_duration_bars: usize,
}

/// Backtest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub timeframe: String,
    pub strategy_id: String,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline as a fraction of the peak
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trade_count: usize,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<EquityPoint>,
    pub trades: Vec<Position>,
    pub metrics: PerformanceMetrics,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub execution_time_ms: u64,
}

/// Everything one backtest run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub result: BacktestResult,
    pub signals: Vec<Signal>,
    pub confluence: Vec<ConfluenceSignal>,
}

/// Submitted job request; one job per timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub symbol: String,
    pub timeframes: Vec<String>,
    pub strategy_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl JobRequest {
    pub fn expand(&self) -> Vec<JobSpec> {
        self.timeframes
            .iter()
            .map(|tf| JobSpec {
                symbol: self.symbol.clone(),
                timeframe: tf.clone(),
                strategy_id: self.strategy_id.clone(),
                range: DateRange::new(self.start, self.end),
            })
            .collect()
    }
}

/// One independent backtest job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub symbol: String,
    pub timeframe: String,
    pub strategy_id: String,
    pub range: DateRange,
}

impl JobSpec {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        strategy_id: impl Into<String>,
        range: DateRange,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            strategy_id: strategy_id.into(),
            range,
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.symbol, self.timeframe, self.strategy_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&EngineError> for JobFailure {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(Box<BacktestRun>),
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn run(&self) -> Option<&BacktestRun> {
        match self {
            JobOutcome::Completed(run) => Some(run),
            JobOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Completed(_) => None,
            JobOutcome::Failed(failure) => Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: JobSpec,
    pub outcome: JobOutcome,
    pub elapsed_ms: u64,
}

/// One entry per submitted job, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub records: Vec<JobRecord>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.records.len() - self.success_count()
    }

    pub fn results(&self) -> impl Iterator<Item = &BacktestResult> {
        self.records
            .iter()
            .filter_map(|r| r.outcome.run().map(|run| &run.result))
    }

    /// Success rate, timing and the headline metrics of every completed job
    pub fn summary(&self) -> BatchSummary {
        let total_jobs = self.records.len();
        let succeeded = self.success_count();
        let total_job_time_ms: u64 = self.records.iter().map(|r| r.elapsed_ms).sum();

        let mut failures_by_kind = BTreeMap::new();
        for failure in self.records.iter().filter_map(|r| r.outcome.failure()) {
            *failures_by_kind.entry(failure.kind).or_insert(0) += 1;
        }

        let jobs = self
            .records
            .iter()
            .filter_map(|record| {
                let result = &record.outcome.run()?.result;
                Some(JobSummary {
                    symbol: result.symbol.clone(),
                    timeframe: result.timeframe.clone(),
                    strategy_id: result.strategy_id.clone(),
                    trade_count: result.trade_count,
                    win_rate: result.win_rate,
                    total_return: result.total_return,
                    sharpe_ratio: result.sharpe_ratio,
                    max_drawdown: result.max_drawdown,
                    elapsed_ms: record.elapsed_ms,
                })
            })
            .collect();

        BatchSummary {
            total_jobs,
            succeeded,
            failed: total_jobs - succeeded,
            success_rate: if total_jobs == 0 {
                0.0
            } else {
                succeeded as f64 / total_jobs as f64
            },
            wall_time_ms: self.elapsed_ms,
            total_job_time_ms,
            avg_job_time_ms: if total_jobs == 0 {
                0.0
            } else {
                total_job_time_ms as f64 / total_jobs as f64
            },
            failures_by_kind,
            jobs,
        }
    }
}

/// Headline metrics of one completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub symbol: String,
    pub timeframe: String,
    pub strategy_id: String,
    pub trade_count: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub elapsed_ms: u64,
}

/// Aggregate view of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Zero for an empty batch
    pub success_rate: f64,
    /// Submission to last record
    pub wall_time_ms: u64,
    /// Sum of per-job run times; exceeds wall time when jobs overlap
    pub total_job_time_ms: u64,
    pub avg_job_time_ms: f64,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// Completed jobs in submission order
    pub jobs: Vec<JobSummary>,
}

/// Signals from the trailing window of one scanned series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestScan {
    pub bar_count: usize,
    pub lookback_bars: usize,
    pub signals: Vec<Signal>,
    pub confluence: Vec<ConfluenceSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Screened(LatestScan),
    Failed(JobFailure),
}

impl ScreeningOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScreeningOutcome::Screened(_))
    }

    pub fn latest(&self) -> Option<&LatestScan> {
        match self {
            ScreeningOutcome::Screened(latest) => Some(latest),
            ScreeningOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            ScreeningOutcome::Screened(_) => None,
            ScreeningOutcome::Failed(failure) => Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRecord {
    pub job: JobSpec,
    pub outcome: ScreeningOutcome,
    pub elapsed_ms: u64,
}

/// One screening entry per submitted job, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub records: Vec<ScreeningRecord>,
    pub elapsed_ms: u64,
}

impl ScreeningReport {
    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.records.len() - self.success_count()
    }

    /// Screened jobs with at least one recent signal
    pub fn hits(&self) -> impl Iterator<Item = (&JobSpec, &LatestScan)> {
        self.records.iter().filter_map(|r| {
            r.outcome
                .latest()
                .filter(|latest| !latest.signals.is_empty())
                .map(|latest| (&r.job, latest))
        })
    }
}
