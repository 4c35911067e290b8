use common::Result;

use super::check_window;

/// Calculate RSI using Wilder's Smoothing
///
/// # Arguments
/// * `prices` - Slice of closing prices
/// * `period` - RSI period (14 by default)
///
/// # Returns
/// Vector of the same length as the input; `None` through the warmup bars
/// (indices `0..period`). Value `i` only reads `prices[..=i]`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    check_window(period, prices.len(), period + 1)?;

    let n = prices.len();
    let mut rsi = vec![None; n];
    let alpha = 1.0 / period as f64;

    // Seed averages from the first `period` deltas
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += delta.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    rsi[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..n {
        let delta = prices[i] - prices[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;
        rsi[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    Ok(rsi)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // Flat window reads neutral
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}
