use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::{BarSeries, DateRange, EngineError, Result};
use tracing::debug;

use super::load_file;

/// Source of bar series keyed by (symbol, timeframe, range).
///
/// Implementations are shared read-only across scheduler workers.
pub trait BarProvider: Send + Sync {
    /// Bars inside `range` (inclusive). A range with no bars is an empty
    /// series, not an error.
    fn fetch(&self, symbol: &str, timeframe: &str, range: &DateRange) -> Result<BarSeries>;
}

/// Series held in memory; unknown keys yield an empty series
#[derive(Debug, Default, Clone)]
pub struct InMemoryBarProvider {
    series: HashMap<(String, String), BarSeries>,
}

impl InMemoryBarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: BarSeries) {
        let key = (series.symbol().to_string(), series.timeframe().to_string());
        self.series.insert(key, series);
    }

    pub fn with_series(mut self, series: BarSeries) -> Self {
        self.insert(series);
        self
    }
}

impl BarProvider for InMemoryBarProvider {
    fn fetch(&self, symbol: &str, timeframe: &str, range: &DateRange) -> Result<BarSeries> {
        let key = (symbol.to_string(), timeframe.to_string());
        Ok(match self.series.get(&key) {
            Some(series) => series.within(range),
            None => BarSeries::empty(symbol, timeframe),
        })
    }
}

/// Reads `<root>/<SYMBOL>_<TIMEFRAME>.csv` or `.json`
#[derive(Debug, Clone)]
pub struct FileBarProvider {
    root: PathBuf,
}

impl FileBarProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn locate(&self, symbol: &str, timeframe: &str) -> Option<PathBuf> {
        ["csv", "json"]
            .iter()
            .map(|ext| self.root.join(format!("{}_{}.{}", symbol, timeframe, ext)))
            .find(|p| p.is_file())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BarProvider for FileBarProvider {
    fn fetch(&self, symbol: &str, timeframe: &str, range: &DateRange) -> Result<BarSeries> {
        let path = self.locate(symbol, timeframe).ok_or_else(|| {
            EngineError::DataLoad(format!(
                "no data file for {} {} under {}",
                symbol,
                timeframe,
                self.root.display()
            ))
        })?;

        let bars = load_file(&path)?;
        debug!(path = %path.display(), bars = bars.len(), "loaded bar file");

        Ok(BarSeries::new(symbol, timeframe, bars)?.within(range))
    }
}
