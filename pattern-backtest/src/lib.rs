//! Pattern recognition and backtesting on OHLCV bar series.
//!
//! Indicators feed a closed set of causal detectors whose signals are scored
//! for confluence and replayed through a single-position backtest. Batches of
//! independent jobs run on a worker pool behind [`BacktestService`].

pub mod confluence;
pub mod data;
pub mod detectors;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod portfolio;
pub mod results;
pub mod scanner;
pub mod scheduler;
pub mod service;

pub use confluence::ConfluenceEngine;
pub use data::{load_file, BarProvider, FileBarProvider, InMemoryBarProvider};
pub use detectors::{track_zones, Detector, TrackedZone};
pub use engine::{BacktestEngine, EngineState};
pub use execution::{Fill, FillModel, Side};
pub use indicators::Indicators;
pub use metrics::MetricsCalculator;
pub use optimizer::{OptimizationResult, Optimizer, ParameterGrid};
pub use portfolio::Portfolio;
pub use results::{
    BatchHandle, JsonLinesSink, LoggedSignal, ResultFilter, ResultSink, ResultStore,
    SignalCursor, SignalEvent, SignalLog, SignalPage,
};
pub use scanner::{LatestSignals, ScanReport, Scanner};
pub use scheduler::{CancelToken, ParallelScheduler};
pub use service::BacktestService;

// Re-export common types
pub use common::{
    BacktestResult, BacktestRun, Bar, BarSeries, BatchReport, BatchSummary, ConfluenceSignal,
    DetectorKind, Direction, EngineConfig, EngineError, ExitReason, JobRequest, JobSpec,
    LatestScan, Position, Result, ScreeningOutcome, ScreeningReport, Signal, StrategyConfig,
};
