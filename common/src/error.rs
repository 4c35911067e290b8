use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BatchReport, ScreeningReport};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data: need at least {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No bars for {symbol} {timeframe}")]
    EmptyData { symbol: String, timeframe: String },

    #[error("Malformed bar series at index {index}: {reason}")]
    MalformedSeries { index: usize, reason: String },

    #[error("Detector {detector} failed on {symbol} {timeframe}: {message}")]
    DetectorRuntime {
        symbol: String,
        timeframe: String,
        detector: String,
        message: String,
    },

    #[error("Job exceeded its time limit: {elapsed_ms}ms > {limit_ms}ms")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("Job cancelled before it started")]
    Cancelled,

    #[error("Job {job} panicked: {message}")]
    JobPanicked { job: String, message: String },

    #[error("Data loading error: {0}")]
    DataLoad(String),

    #[error("A position is already open")]
    PositionAlreadyOpen,

    #[error("Insufficient cash: need ${required:.2}, have ${available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    /// Carries the report so per-job failure reasons survive
    #[error("All {failed} jobs in the batch failed")]
    AllJobsFailed {
        failed: usize,
        report: Box<BatchReport>,
    },

    #[error("All {failed} jobs in the screening batch failed")]
    AllScreensFailed {
        failed: usize,
        report: Box<ScreeningReport>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfig(msg.into())
    }

    /// Classification recorded in a job's failure record.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::InsufficientData { .. } => FailureKind::InsufficientData,
            EngineError::InvalidConfig(_) => FailureKind::InvalidConfig,
            EngineError::EmptyData { .. } => FailureKind::EmptyData,
            EngineError::MalformedSeries { .. } => FailureKind::MalformedData,
            EngineError::DetectorRuntime { .. } => FailureKind::DetectorRuntime,
            EngineError::Timeout { .. } => FailureKind::Timeout,
            EngineError::Cancelled => FailureKind::Cancelled,
            EngineError::DataLoad(_)
            | EngineError::Io(_)
            | EngineError::Csv(_)
            | EngineError::Json(_)
            | EngineError::Toml(_) => FailureKind::DataUnavailable,
            EngineError::JobPanicked { .. }
            | EngineError::PositionAlreadyOpen
            | EngineError::InsufficientCash { .. }
            | EngineError::AllJobsFailed { .. }
            | EngineError::AllScreensFailed { .. } => FailureKind::Internal,
        }
    }
}

/// Serializable failure category for per-job failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientData,
    InvalidConfig,
    EmptyData,
    MalformedData,
    DetectorRuntime,
    Timeout,
    Cancelled,
    DataUnavailable,
    Internal,
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        let err = EngineError::EmptyData {
            symbol: "AAPL".to_string(),
            timeframe: "1D".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::EmptyData);
        assert_eq!(
            EngineError::Timeout {
                elapsed_ms: 20,
                limit_ms: 10
            }
            .failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            EngineError::invalid_config("window must be > 0").failure_kind(),
            FailureKind::InvalidConfig
        );
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = EngineError::DetectorRuntime {
            symbol: "MSFT".to_string(),
            timeframe: "1H".to_string(),
            detector: "order_block".to_string(),
            message: "index out of bounds".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("MSFT"));
        assert!(text.contains("1H"));
        assert!(text.contains("order_block"));
    }
}
