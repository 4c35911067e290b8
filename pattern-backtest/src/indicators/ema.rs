use common::Result;

use super::check_window;

/// Calculate EMA seeded with the SMA of the first `period` prices.
pub fn calculate_ema(prices: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    check_window(period, prices.len(), period)?;

    let n = prices.len();
    let mut ema = vec![None; n];
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut current = prices[..period].iter().sum::<f64>() / period as f64;
    ema[period - 1] = Some(current);

    for i in period..n {
        current = (prices[i] - current) * multiplier + current;
        ema[i] = Some(current);
    }

    Ok(ema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_with_sma_seed() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let ema = calculate_ema(&prices, 3).unwrap();

        assert_eq!(ema.len(), prices.len());
        assert!(ema[1].is_none());
        assert_eq!(ema[2], Some(2.0)); // SMA of first 3
        // (4 - 2) * 0.5 + 2
        assert_eq!(ema[3], Some(3.0));
    }

    #[test]
    fn test_ema_trends_toward_price() {
        let prices = vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let ema = calculate_ema(&prices, 3).unwrap();
        for i in 3..prices.len() {
            assert!(ema[i].unwrap() > ema[i - 1].unwrap());
        }
    }
}
