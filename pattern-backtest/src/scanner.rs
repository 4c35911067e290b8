use std::panic::{self, AssertUnwindSafe};

use common::{
    BarSeries, ConfluenceSignal, DetectorKind, EngineError, LatestScan, Result, Signal,
    StrategyConfig,
};
use tracing::{debug, error};

use crate::confluence::ConfluenceEngine;
use crate::detectors::{track_zones, Detector, TrackedZone};
use crate::indicators::Indicators;

/// Everything one scan pass produced
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub bar_count: usize,
    /// Ordered by (bar index, detector, direction)
    pub signals: Vec<Signal>,
    pub confluence: Vec<ConfluenceSignal>,
    pub zones: Vec<TrackedZone>,
}

/// Signals and confluence inside the trailing window of a report
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSignals<'a> {
    pub signals: Vec<&'a Signal>,
    pub confluence: Vec<&'a ConfluenceSignal>,
}

impl ScanReport {
    /// Signals from the last `lookback_bars` bars
    pub fn latest(&self, lookback_bars: usize) -> LatestSignals<'_> {
        let from = self.bar_count.saturating_sub(lookback_bars);
        LatestSignals {
            signals: self.signals.iter().filter(|s| s.bar_index >= from).collect(),
            confluence: self.confluence.iter().filter(|c| c.bar_index >= from).collect(),
        }
    }

    /// Owned copy of the trailing window, for screening results
    pub fn snapshot(&self, lookback_bars: usize) -> LatestScan {
        let latest = self.latest(lookback_bars);
        LatestScan {
            bar_count: self.bar_count,
            lookback_bars,
            signals: latest.signals.into_iter().cloned().collect(),
            confluence: latest.confluence.into_iter().cloned().collect(),
        }
    }

    pub fn count_by(&self, kind: DetectorKind) -> usize {
        self.signals.iter().filter(|s| s.detector == kind).count()
    }
}

/// Indicator pass, detector pass and confluence pass for one strategy
#[derive(Debug, Clone)]
pub struct Scanner {
    strategy: StrategyConfig,
    detectors: Vec<Detector>,
    confluence: ConfluenceEngine,
}

impl Scanner {
    pub fn new(strategy: &StrategyConfig) -> Result<Self> {
        strategy.validate()?;
        let detectors = Detector::enabled(&strategy.detectors);
        let kinds: Vec<DetectorKind> = detectors.iter().map(|d| d.kind()).collect();
        let confluence = ConfluenceEngine::new(strategy.confluence.clone(), &kinds)?;

        Ok(Self {
            strategy: strategy.clone(),
            detectors,
            confluence,
        })
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn indicators(&self, series: &BarSeries) -> Result<Indicators> {
        let windows: Vec<usize> = self.detectors.iter().filter_map(|d| d.pivot_window()).collect();
        Indicators::compute(series, &self.strategy.indicators, &windows)
    }

    pub fn scan(&self, series: &BarSeries) -> Result<ScanReport> {
        let indicators = self.indicators(series)?;
        self.scan_with(series, &indicators)
    }

    /// Run every detector. A detector fault aborts the scan with
    /// `DetectorRuntime`.
    pub fn scan_with(&self, series: &BarSeries, indicators: &Indicators) -> Result<ScanReport> {
        let mut signals = Vec::new();
        for detector in &self.detectors {
            let found = guarded(detector.kind(), series, || {
                #[cfg(test)]
                fault::trip(detector.kind(), series);
                detector.scan(series, indicators)
            })?;
            debug!(
                symbol = series.symbol(),
                timeframe = series.timeframe(),
                detector = %detector.kind(),
                count = found.len(),
                "detector finished"
            );
            signals.extend(found);
        }
        signals.sort_by_key(|s| (s.bar_index, s.detector, s.direction));

        let confluence = self.confluence.aggregate(&signals);
        let zones = track_zones(series, &signals);

        Ok(ScanReport {
            bar_count: series.len(),
            signals,
            confluence,
            zones,
        })
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one detector, turning a panic into `DetectorRuntime` with context.
pub(crate) fn guarded<F>(kind: DetectorKind, series: &BarSeries, f: F) -> Result<Vec<Signal>>
where
    F: FnOnce() -> Result<Vec<Signal>>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                symbol = series.symbol(),
                timeframe = series.timeframe(),
                detector = %kind,
                %message,
                "detector fault"
            );
            Err(EngineError::DetectorRuntime {
                symbol: series.symbol().to_string(),
                timeframe: series.timeframe().to_string(),
                detector: kind.name().to_string(),
                message,
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_random_walk;
    use common::DetectorConfig;

    #[test]
    fn test_scan_is_ordered_and_repeatable() {
        let series = generate_random_walk("SPY", "1D", 300, 100.0, 21).unwrap();
        let scanner = Scanner::new(&StrategyConfig::default()).unwrap();

        let first = scanner.scan(&series).unwrap();
        let second = scanner.scan(&series).unwrap();

        assert_eq!(first, second);
        for pair in first.signals.windows(2) {
            let a = (pair[0].bar_index, pair[0].detector, pair[0].direction);
            let b = (pair[1].bar_index, pair[1].detector, pair[1].direction);
            assert!(a <= b);
        }
    }

    #[test]
    fn test_latest_window() {
        let series = generate_random_walk("SPY", "1D", 300, 100.0, 21).unwrap();
        let strategy = StrategyConfig::default()
            .with_detectors(DetectorConfig::only(&[DetectorKind::Swing]));
        let report = Scanner::new(&strategy).unwrap().scan(&series).unwrap();

        let latest = report.latest(50);

        assert!(latest.signals.iter().all(|s| s.bar_index >= 250));
        let expected = report.signals.iter().filter(|s| s.bar_index >= 250).count();
        assert_eq!(latest.signals.len(), expected);
        assert_eq!(report.latest(1000).signals.len(), report.signals.len());
    }

    #[test]
    fn test_snapshot_owns_latest_window() {
        let series = generate_random_walk("SPY", "1D", 300, 100.0, 21).unwrap();
        let report = Scanner::new(&StrategyConfig::default()).unwrap().scan(&series).unwrap();

        let snapshot = report.snapshot(40);

        assert_eq!(snapshot.bar_count, 300);
        assert_eq!(snapshot.lookback_bars, 40);
        assert_eq!(snapshot.signals.len(), report.latest(40).signals.len());
        assert!(snapshot.signals.iter().all(|s| s.bar_index >= 260));
        assert!(snapshot.confluence.iter().all(|c| c.bar_index >= 260));
    }

    #[test]
    fn test_faulting_detector_aborts_scan() {
        let series = generate_random_walk(fault::FAULTY_SYMBOL, "1D", 120, 100.0, 4).unwrap();
        let err = Scanner::new(&StrategyConfig::default())
            .unwrap()
            .scan(&series)
            .unwrap_err();

        assert_eq!(err.failure_kind(), common::FailureKind::DetectorRuntime);
        assert!(err.to_string().contains("injected"));
    }

    #[test]
    fn test_panic_becomes_detector_runtime() {
        let series = generate_random_walk("QQQ", "4H", 10, 100.0, 1).unwrap();

        let err = guarded(DetectorKind::Flag, &series, || -> Result<Vec<Signal>> {
            panic!("slice index out of range")
        })
        .unwrap_err();

        match err {
            EngineError::DetectorRuntime {
                symbol,
                timeframe,
                detector,
                message,
            } => {
                assert_eq!(symbol, "QQQ");
                assert_eq!(timeframe, "4H");
                assert_eq!(detector, "flag");
                assert!(message.contains("slice index"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let mut strategy = StrategyConfig::default();
        strategy.detectors.choch.swing_window = 0;
        assert!(matches!(
            Scanner::new(&strategy),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
