use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Bar, BarSeries, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Generate a reproducible random-walk series of daily bars
pub fn generate_random_walk(
    symbol: &str,
    timeframe: &str,
    days: usize,
    initial_price: f64,
    seed: u64,
) -> Result<BarSeries> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(days);

    let mut price = initial_price;
    let start_date = epoch();

    let daily_volatility = 0.02;
    let drift = 0.0002;

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);

        let random_return: f64 = rng.gen_range(-1.0..1.0);
        let daily_return = drift + daily_volatility * random_return;
        let new_price = price * (1.0 + daily_return);

        let intraday_range = price * rng.gen_range(0.005..0.03);
        let open = price + rng.gen_range(-intraday_range / 2.0..intraday_range / 2.0);
        let close = new_price;
        let high = open.max(close) + rng.gen_range(0.0..intraday_range / 2.0);
        let low = open.min(close) - rng.gen_range(0.0..intraday_range / 2.0);

        // Higher volume on volatile days
        let volume_multiplier = 1.0 + daily_return.abs() * 10.0;
        let volume = (1_000_000.0 * volume_multiplier * rng.gen_range(0.8..1.2)).round();

        bars.push(Bar::new(date, open, high, low, close, volume));
        price = new_price;
    }

    BarSeries::new(symbol, timeframe, bars)
}

/// Build daily bars from a close path.
///
/// Each bar opens at the previous close (the first at its own close) and its
/// wicks extend `wick` beyond the body.
pub fn bars_from_closes(
    symbol: &str,
    timeframe: &str,
    closes: &[f64],
    wick: f64,
    volume: f64,
) -> Result<BarSeries> {
    let start_date = epoch();
    let mut prev = closes.first().copied().unwrap_or_default();

    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar::new(
                start_date + Duration::days(i as i64),
                open,
                open.max(close) + wick,
                open.min(close) - wick,
                close,
                volume,
            )
        })
        .collect();

    BarSeries::new(symbol, timeframe, bars)
}

/// Price falls `depth` steps of `step` then climbs back symmetrically.
///
/// Bars are uniform (same range and volume) so structure detectors see a
/// single pivot at the bottom and no gaps.
pub fn generate_v_shape(
    symbol: &str,
    timeframe: &str,
    start_price: f64,
    step: f64,
    depth: usize,
) -> Result<BarSeries> {
    let start_date = epoch();
    let mut bars = Vec::with_capacity(2 * depth + 1);

    for i in 0..=(2 * depth) {
        let distance = if i <= depth { i } else { 2 * depth - i };
        let close = start_price - step * distance as f64;
        bars.push(Bar::new(
            start_date + Duration::days(i as i64),
            close,
            close + 1.5 * step,
            close - 1.5 * step,
            close,
            1_000_000.0,
        ));
    }

    BarSeries::new(symbol, timeframe, bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_walk_is_valid_and_seeded() {
        let a = generate_random_walk("SPY", "1D", 100, 50.0, 42).unwrap();
        let b = generate_random_walk("SPY", "1D", 100, 50.0, 42).unwrap();

        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
        for bar in a.bars() {
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.volume > 0.0);
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate_random_walk("SPY", "1D", 30, 50.0, 1).unwrap();
        let b = generate_random_walk("SPY", "1D", 30, 50.0, 2).unwrap();
        assert_ne!(a.closes(), b.closes());
    }

    #[test]
    fn test_v_shape_is_symmetric() {
        let series = generate_v_shape("V", "1D", 100.0, 1.0, 10).unwrap();
        let closes = series.closes();

        assert_eq!(closes.len(), 21);
        assert_eq!(closes[10], 90.0);
        assert_eq!(closes[0], closes[20]);
    }

    #[test]
    fn test_bars_from_closes_chain_opens() {
        let series = bars_from_closes("X", "1D", &[10.0, 11.0, 9.0], 0.1, 500.0).unwrap();
        let bars = series.bars();

        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[1].open, 10.0);
        assert_eq!(bars[2].open, 11.0);
        assert!((bars[2].high - 11.1).abs() < 1e-12);
        assert!((bars[2].low - 8.9).abs() < 1e-12);
    }
}
