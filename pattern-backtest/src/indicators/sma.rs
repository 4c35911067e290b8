use common::Result;

use super::check_window;

/// Simple moving average over `period` values.
///
/// Index `i` averages `values[i + 1 - period..=i]`; the first `period - 1`
/// slots stay `None`. Used for both closes and volumes.
pub fn calculate_sma(values: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    check_window(period, values.len(), period)?;

    let mut out = vec![None; period - 1];
    let mut window_sum: f64 = values[..period].iter().sum();
    out.push(Some(window_sum / period as f64));

    for (leaving, entering) in values.iter().zip(&values[period..]) {
        window_sum += entering - leaving;
        out.push(Some(window_sum / period as f64));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_warmup_then_rolling_mean() {
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        let sma = calculate_sma(&closes, 4).unwrap();

        assert_eq!(sma.len(), 10);
        assert!(sma[..3].iter().all(Option::is_none));
        assert_relative_eq!(sma[3].unwrap(), 2.5);
        assert_relative_eq!(sma[9].unwrap(), 8.5);
    }

    #[test]
    fn test_period_one_is_identity() {
        let volumes = [1200.0, 900.0, 1500.0];
        let sma = calculate_sma(&volumes, 1).unwrap();
        assert_eq!(sma, vec![Some(1200.0), Some(900.0), Some(1500.0)]);
    }

    #[test]
    fn test_short_input_is_insufficient() {
        assert!(calculate_sma(&[1.0, 2.0, 3.0], 5).is_err());
        assert!(calculate_sma(&[1.0, 2.0, 3.0], 0).is_err());
    }
}
