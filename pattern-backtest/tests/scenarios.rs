use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use pattern_backtest::data::{bars_from_closes, generate_random_walk, generate_v_shape};
use pattern_backtest::{
    BacktestEngine, Bar, BarSeries, DetectorKind, Direction, EngineError, InMemoryBarProvider,
    JobSpec, ParallelScheduler, Scanner, StrategyConfig,
};
use common::{
    DateRange, DetectorConfig, DivergenceKind, FailureKind, IndicatorParams, SchedulerConfig,
    SignalMetadata,
};

fn series(symbol: &str, rows: &[(f64, f64, f64, f64)]) -> BarSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let bars = rows
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar::new(start + Duration::days(i as i64), o, h, l, c, 1000.0))
        .collect();
    BarSeries::new(symbol, "1D", bars).unwrap()
}

fn everything() -> DateRange {
    DateRange::new(
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
    )
}

#[test]
fn v_shaped_recovery_trades_nothing() {
    let series = generate_v_shape("V", "1D", 100.0, 1.0, 10).unwrap();
    let engine = BacktestEngine::new(StrategyConfig::default()).unwrap();

    let run = engine.run(&series).unwrap();

    assert!(run.confluence.is_empty());
    assert_eq!(run.result.trade_count, 0);
    assert_eq!(run.result.total_return, 0.0);
    assert_eq!(run.result.sharpe_ratio, 0.0);
    assert_eq!(run.result.win_rate, 0.0);
    assert_eq!(run.result.max_drawdown, 0.0);
    assert_relative_eq!(run.result.final_equity, run.result.initial_equity);
}

#[test]
fn three_bar_gap_emits_one_bullish_zone_until_filled() {
    let series = series(
        "GAP",
        &[
            (96.0, 100.0, 95.0, 99.0),
            (99.0, 108.0, 99.0, 107.0),
            (110.5, 115.0, 110.0, 114.0),
            (111.0, 112.0, 101.0, 103.0),
            (103.0, 111.0, 99.0, 100.0),
        ],
    );
    let strategy = StrategyConfig::default()
        .with_detectors(DetectorConfig::only(&[DetectorKind::FairValueGap]));

    let report = Scanner::new(&strategy).unwrap().scan(&series).unwrap();

    assert_eq!(report.signals.len(), 1);
    let signal = &report.signals[0];
    assert_eq!(signal.direction, Direction::Bullish);
    assert_eq!(signal.bar_index, 2);
    let zone = signal.metadata.zone().unwrap();
    assert_eq!(zone.low, 100.0);
    assert_eq!(zone.high, 110.0);

    assert_eq!(report.zones.len(), 1);
    assert!(report.zones[0].is_active_at(3));
    assert_eq!(report.zones[0].invalidated_at, Some(4));
}

#[test]
fn batch_with_an_empty_series_reports_every_job() {
    let provider = InMemoryBarProvider::new()
        .with_series(generate_random_walk("AAA", "1D", 200, 50.0, 1).unwrap())
        .with_series(BarSeries::empty("BBB", "1D"))
        .with_series(generate_random_walk("CCC", "1D", 200, 80.0, 2).unwrap());
    let scheduler = ParallelScheduler::new(
        SchedulerConfig::default().with_workers(3),
        Arc::new(provider),
        vec![StrategyConfig::default()],
    )
    .unwrap();

    let jobs = vec![
        JobSpec::new("AAA", "1D", "default", everything()),
        JobSpec::new("BBB", "1D", "default", everything()),
        JobSpec::new("CCC", "1D", "default", everything()),
    ];
    let report = scheduler.run_batch(&jobs).unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.success_count(), 2);
    assert!(report.records[0].outcome.is_success());
    assert!(report.records[2].outcome.is_success());
    let failure = report.records[1].outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::EmptyData);
    assert!(failure.message.contains("BBB"));
}

#[test]
fn batch_fails_only_when_every_job_fails() {
    let scheduler = ParallelScheduler::new(
        SchedulerConfig::default().with_workers(2),
        Arc::new(InMemoryBarProvider::new()),
        vec![StrategyConfig::default()],
    )
    .unwrap();
    let jobs = vec![
        JobSpec::new("X", "1D", "default", everything()),
        JobSpec::new("Y", "1D", "default", everything()),
    ];

    match scheduler.run_batch(&jobs).unwrap_err() {
        EngineError::AllJobsFailed { failed, report } => {
            assert_eq!(failed, 2);
            assert!(report
                .records
                .iter()
                .all(|r| r.outcome.failure().unwrap().kind == FailureKind::EmptyData));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn higher_high_with_lower_rsi_is_one_bearish_divergence() {
    let closes = [
        100.0, 99.5, 99.0, 98.5, 98.0, 100.0, 102.0, 104.0, 106.0, 108.0, 107.0, 106.0, 105.0,
        104.0, 105.5, 104.5, 106.0, 105.0, 106.5, 105.5, 107.0, 106.0, 107.5, 106.5, 108.5, 107.0,
        105.0, 103.0,
    ];
    let series = bars_from_closes("DIV", "1D", &closes, 0.1, 1000.0).unwrap();
    let strategy = StrategyConfig::default()
        .with_indicators(IndicatorParams {
            rsi_period: 3,
            ..Default::default()
        })
        .with_detectors(DetectorConfig::only(&[DetectorKind::RsiDivergence]));

    let report = Scanner::new(&strategy).unwrap().scan(&series).unwrap();

    assert_eq!(report.signals.len(), 1);
    let signal = &report.signals[0];
    assert_eq!(signal.direction, Direction::Bearish);
    // Pivot at 24 is confirmed two bars later
    assert_eq!(signal.bar_index, 26);
    match &signal.metadata {
        SignalMetadata::Divergence {
            kind,
            prior_pivot_index,
            pivot_index,
            prior_price,
            price,
            prior_rsi,
            rsi,
        } => {
            assert_eq!(*kind, DivergenceKind::Regular);
            assert_eq!(*prior_pivot_index, 9);
            assert_eq!(*pivot_index, 24);
            assert!(price > prior_price);
            assert!(rsi < prior_rsi);
        }
        other => panic!("unexpected metadata: {other:?}"),
    }
}

#[test]
fn invalid_strategy_fails_only_its_job() {
    // A zero window is rejected before any detector runs
    let mut broken = StrategyConfig::new("broken");
    broken.detectors.swing.window = 0;

    let provider = InMemoryBarProvider::new()
        .with_series(generate_random_walk("AAA", "1D", 150, 50.0, 5).unwrap());
    let scheduler = ParallelScheduler::new(
        SchedulerConfig::default().with_workers(2),
        Arc::new(provider),
        vec![StrategyConfig::default(), broken],
    )
    .unwrap();

    let report = scheduler
        .run_batch(&[
            JobSpec::new("AAA", "1D", "broken", everything()),
            JobSpec::new("AAA", "1D", "default", everything()),
        ])
        .unwrap();

    assert_eq!(
        report.records[0].outcome.failure().unwrap().kind,
        FailureKind::InvalidConfig
    );
    assert!(report.records[1].outcome.is_success());
}
