use common::{Result, SwingKind};
use serde::{Deserialize, Serialize};

use super::check_window;

/// Local extremum over a symmetric window.
///
/// A pivot at `index` needs `window` bars on its right before it can be
/// known, so it only becomes visible at `confirmed_at = index + window`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    pub confirmed_at: usize,
    pub kind: SwingKind,
    pub price: f64,
}

/// Find swing highs and lows.
///
/// A swing high is strictly above the `window` highs before it and not
/// below the `window` highs after it, so a flat top yields one pivot at its
/// first bar. Swing lows mirror this on the lows. Output is ordered by index,
/// highs before lows on the same bar.
pub fn find_pivots(highs: &[f64], lows: &[f64], window: usize) -> Result<Vec<Pivot>> {
    let n = highs.len().min(lows.len());
    check_window(window, n, 2 * window + 1)?;

    let mut pivots = Vec::new();
    for i in window..n - window {
        let left = i - window..i;
        let right = i + 1..=i + window;

        if left.clone().all(|j| highs[i] > highs[j])
            && right.clone().all(|j| highs[i] >= highs[j])
        {
            pivots.push(Pivot {
                index: i,
                confirmed_at: i + window,
                kind: SwingKind::High,
                price: highs[i],
            });
        }
        if left.clone().all(|j| lows[i] < lows[j]) && right.clone().all(|j| lows[i] <= lows[j]) {
            pivots.push(Pivot {
                index: i,
                confirmed_at: i + window,
                kind: SwingKind::Low,
                price: lows[i],
            });
        }
    }

    Ok(pivots)
}
