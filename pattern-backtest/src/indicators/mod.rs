pub mod atr;
pub mod ema;
pub mod pivots;
pub mod rsi;
pub mod sma;

use std::borrow::Cow;
use std::collections::BTreeMap;

pub use atr::{calculate_atr, true_range};
pub use ema::calculate_ema;
pub use pivots::{find_pivots, Pivot};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use common::{BarSeries, EngineError, IndicatorParams, Result};

/// Shared guard: a zero window is a configuration error, a series shorter
/// than `required` is insufficient data.
pub(crate) fn check_window(period: usize, len: usize, required: usize) -> Result<()> {
    if period == 0 {
        return Err(EngineError::invalid_config("indicator window must be > 0"));
    }
    if len < required {
        return Err(EngineError::InsufficientData {
            required,
            actual: len,
        });
    }
    Ok(())
}

/// Too little data means "no values yet", anything else is a real error.
fn or_warmup(result: Result<Vec<Option<f64>>>, len: usize) -> Result<Vec<Option<f64>>> {
    match result {
        Ok(values) => Ok(values),
        Err(EngineError::InsufficientData { .. }) => Ok(vec![None; len]),
        Err(e) => Err(e),
    }
}

/// Pre-computed indicators for all bars of one series
#[derive(Debug, Clone, PartialEq)]
pub struct Indicators {
    pub rsi: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub sma: Vec<Option<f64>>,
    pub ema: Vec<Option<f64>>,
    pub volume_sma: Vec<Option<f64>>,
    pivots: BTreeMap<usize, Vec<Pivot>>,
}

impl Indicators {
    /// Calculate all indicators from price data.
    ///
    /// `pivot_windows` lists the swing windows detectors will ask for; each
    /// is computed once here and shared.
    pub fn compute(
        series: &BarSeries,
        params: &IndicatorParams,
        pivot_windows: &[usize],
    ) -> Result<Self> {
        params.validate()?;

        let n = series.len();
        let closes = series.closes();
        let highs = series.highs();
        let lows = series.lows();
        let volumes = series.volumes();

        let mut pivots = BTreeMap::new();
        for &window in pivot_windows {
            if pivots.contains_key(&window) {
                continue;
            }
            let found = match find_pivots(&highs, &lows, window) {
                Ok(found) => found,
                Err(EngineError::InsufficientData { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };
            pivots.insert(window, found);
        }

        Ok(Self {
            rsi: or_warmup(calculate_rsi(&closes, params.rsi_period), n)?,
            atr: or_warmup(calculate_atr(&highs, &lows, &closes, params.atr_period), n)?,
            sma: or_warmup(calculate_sma(&closes, params.sma_period), n)?,
            ema: or_warmup(calculate_ema(&closes, params.ema_period), n)?,
            volume_sma: or_warmup(calculate_sma(&volumes, params.volume_period), n)?,
            pivots,
        })
    }

    pub fn len(&self) -> usize {
        self.rsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_empty()
    }

    pub fn rsi_at(&self, idx: usize) -> Option<f64> {
        self.rsi.get(idx).copied().flatten()
    }

    pub fn atr_at(&self, idx: usize) -> Option<f64> {
        self.atr.get(idx).copied().flatten()
    }

    /// Swing pivots for `window`, from the cache when it was precomputed.
    pub fn pivots(&self, series: &BarSeries, window: usize) -> Result<Cow<'_, [Pivot]>> {
        if let Some(cached) = self.pivots.get(&window) {
            return Ok(Cow::Borrowed(cached.as_slice()));
        }
        match find_pivots(&series.highs(), &series.lows(), window) {
            Ok(found) => Ok(Cow::Owned(found)),
            Err(EngineError::InsufficientData { .. }) => Ok(Cow::Owned(Vec::new())),
            Err(e) => Err(e),
        }
    }
}
