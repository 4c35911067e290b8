pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ChochConfig, ConfluenceConfig, CostModel, DetectorConfig, DetectorWeights, EngineConfig,
    FairValueGapConfig, FlagConfig, IndicatorParams, OrderBlockConfig, RiskConfig,
    RsiDivergenceConfig, SchedulerConfig, StrategyConfig, SwingConfig, SwingFailureConfig,
};
pub use error::{EngineError, FailureKind, Result};
pub use types::*;
