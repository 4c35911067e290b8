use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use common::{
    BacktestResult, BacktestRun, BatchReport, ConfluenceSignal, JobRecord, JobSpec, Result, Signal,
};
use serde::{Deserialize, Serialize};

/// Identifies one submitted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchHandle(u64);

impl BatchHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Match on any combination of symbol, timeframe and strategy; unset
/// fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultFilter {
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub strategy_id: Option<String>,
}

impl ResultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn matches(&self, symbol: &str, timeframe: &str, strategy_id: &str) -> bool {
        let field = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w == have);
        field(&self.symbol, symbol)
            && field(&self.timeframe, timeframe)
            && field(&self.strategy_id, strategy_id)
    }

    pub fn matches_job(&self, job: &JobSpec) -> bool {
        self.matches(&job.symbol, &job.timeframe, &job.strategy_id)
    }
}

/// Append-only collection of batch reports
#[derive(Debug, Default)]
pub struct ResultStore {
    batches: BTreeMap<BatchHandle, BatchReport>,
    next_id: u64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, report: BatchReport) -> BatchHandle {
        let handle = BatchHandle(self.next_id);
        self.next_id += 1;
        self.batches.insert(handle, report);
        handle
    }

    pub fn batch(&self, handle: BatchHandle) -> Option<&BatchReport> {
        self.batches.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Every job record that matches, oldest batch first
    pub fn records(&self, filter: &ResultFilter) -> Vec<&JobRecord> {
        self.batches
            .values()
            .flat_map(|report| report.records.iter())
            .filter(|record| filter.matches_job(&record.job))
            .collect()
    }

    /// Completed results that match, oldest batch first
    pub fn query(&self, filter: &ResultFilter) -> Vec<&BacktestResult> {
        self.records(filter)
            .into_iter()
            .filter_map(|record| record.outcome.run().map(|run| &run.result))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalEvent {
    Signal(Signal),
    Confluence(ConfluenceSignal),
}

impl SignalEvent {
    pub fn symbol(&self) -> &str {
        match self {
            SignalEvent::Signal(s) => &s.symbol,
            SignalEvent::Confluence(c) => &c.symbol,
        }
    }

    pub fn timeframe(&self) -> &str {
        match self {
            SignalEvent::Signal(s) => &s.timeframe,
            SignalEvent::Confluence(c) => &c.timeframe,
        }
    }

    pub fn bar_index(&self) -> usize {
        match self {
            SignalEvent::Signal(s) => s.bar_index,
            SignalEvent::Confluence(c) => c.bar_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedSignal {
    pub sequence: u64,
    pub strategy_id: String,
    pub event: SignalEvent,
}

/// Position in the signal log; `SignalCursor::default()` is the beginning
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SignalCursor(u64);

impl SignalCursor {
    pub fn start() -> Self {
        Self(0)
    }

    pub fn position(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalPage {
    pub events: Vec<LoggedSignal>,
    /// Pass back to continue after the last event scanned
    pub next: SignalCursor,
}

/// Append-only log of every signal and confluence signal produced by
/// completed runs, read with a cursor
#[derive(Debug, Default)]
pub struct SignalLog {
    entries: Vec<LoggedSignal>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a run's events in bar order, each bar's detector signals
    /// before its confluence signal. Returns the appended entries.
    pub fn append_run(&mut self, strategy_id: &str, run: &BacktestRun) -> &[LoggedSignal] {
        let first = self.entries.len();
        let mut signals = run.signals.iter().peekable();

        for confluence in &run.confluence {
            while let Some(signal) = signals.next_if(|s| s.bar_index <= confluence.bar_index) {
                self.push(strategy_id, SignalEvent::Signal(signal.clone()));
            }
            self.push(strategy_id, SignalEvent::Confluence(confluence.clone()));
        }
        for signal in signals {
            self.push(strategy_id, SignalEvent::Signal(signal.clone()));
        }

        &self.entries[first..]
    }

    fn push(&mut self, strategy_id: &str, event: SignalEvent) {
        let sequence = self.entries.len() as u64;
        self.entries.push(LoggedSignal {
            sequence,
            strategy_id: strategy_id.to_string(),
            event,
        });
    }

    /// Up to `limit` matching events after `cursor`
    pub fn since(&self, cursor: SignalCursor, filter: &ResultFilter, limit: usize) -> SignalPage {
        let start = (cursor.0 as usize).min(self.entries.len());
        let mut events = Vec::new();
        let mut next = self.entries.len();

        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            if events.len() == limit {
                next = i;
                break;
            }
            if filter.matches(entry.event.symbol(), entry.event.timeframe(), &entry.strategy_id) {
                events.push(entry.clone());
            }
        }

        SignalPage {
            events,
            next: SignalCursor(next as u64),
        }
    }
}

/// Hand-off point for durable storage owned outside the engine
pub trait ResultSink: Send {
    fn write_result(&mut self, record: &JobRecord) -> Result<()>;

    fn write_signal(&mut self, signal: &LoggedSignal) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Result(&'a JobRecord),
    Signal(&'a LoggedSignal),
}

/// Newline-delimited JSON, one object per result or signal
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &Line<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn write_result(&mut self, record: &JobRecord) -> Result<()> {
        self.write_line(&Line::Result(record))
    }

    fn write_signal(&mut self, signal: &LoggedSignal) -> Result<()> {
        self.write_line(&Line::Signal(signal))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{
        DateRange, DetectorKind, Direction, FailureKind, JobFailure, JobOutcome, PerformanceMetrics,
        SignalMetadata, SwingKind,
    };

    fn ts(i: usize) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
    }

    fn signal(symbol: &str, bar_index: usize) -> Signal {
        Signal {
            detector: DetectorKind::Swing,
            symbol: symbol.to_string(),
            timeframe: "1D".to_string(),
            timestamp: ts(bar_index),
            bar_index,
            direction: Direction::Bullish,
            strength: 0.5,
            metadata: SignalMetadata::Swing {
                kind: SwingKind::Low,
                pivot_index: bar_index.saturating_sub(2),
                pivot_price: 10.0,
            },
        }
    }

    fn confluence(symbol: &str, bar_index: usize) -> ConfluenceSignal {
        ConfluenceSignal {
            symbol: symbol.to_string(),
            timeframe: "1D".to_string(),
            timestamp: ts(bar_index),
            bar_index,
            direction: Direction::Bullish,
            contributing_signals: vec![signal(symbol, bar_index)],
            composite_score: 0.6,
        }
    }

    fn run(symbol: &str, strategy_id: &str) -> BacktestRun {
        BacktestRun {
            result: BacktestResult {
                symbol: symbol.to_string(),
                timeframe: "1D".to_string(),
                strategy_id: strategy_id.to_string(),
                total_return: 0.0,
                sharpe_ratio: 0.0,
                max_drawdown: 0.0,
                win_rate: 0.0,
                trade_count: 0,
                equity_curve: vec![(ts(0), 100.0)],
                drawdown_curve: vec![(ts(0), 0.0)],
                trades: vec![],
                metrics: PerformanceMetrics::default(),
                initial_equity: 100.0,
                final_equity: 100.0,
                start: ts(0),
                end: ts(10),
                execution_time_ms: 1,
            },
            signals: vec![signal(symbol, 3), signal(symbol, 5), signal(symbol, 9)],
            confluence: vec![confluence(symbol, 5)],
        }
    }

    fn record(symbol: &str, strategy_id: &str, ok: bool) -> JobRecord {
        let job = JobSpec::new(symbol, "1D", strategy_id, DateRange::new(ts(0), ts(10)));
        let outcome = if ok {
            JobOutcome::Completed(Box::new(run(symbol, strategy_id)))
        } else {
            JobOutcome::Failed(JobFailure {
                kind: FailureKind::EmptyData,
                message: "no bars".to_string(),
            })
        };
        JobRecord {
            job,
            outcome,
            elapsed_ms: 1,
        }
    }

    fn report(records: Vec<JobRecord>) -> BatchReport {
        BatchReport {
            records,
            elapsed_ms: 2,
        }
    }

    #[test]
    fn test_store_query_by_filter() {
        let mut store = ResultStore::new();
        let first = store.insert(report(vec![
            record("SPY", "default", true),
            record("QQQ", "default", false),
        ]));
        let second = store.insert(report(vec![record("SPY", "tight", true)]));

        assert_ne!(first, second);
        assert_eq!(store.batch(first).unwrap().records.len(), 2);

        let spy = store.query(&ResultFilter::new().with_symbol("SPY"));
        assert_eq!(spy.len(), 2);
        let tight = store.query(&ResultFilter::new().with_strategy("tight"));
        assert_eq!(tight.len(), 1);
        assert_eq!(tight[0].strategy_id, "tight");

        // Failures are records but not results
        let qqq = ResultFilter::new().with_symbol("QQQ");
        assert_eq!(store.records(&qqq).len(), 1);
        assert!(store.query(&qqq).is_empty());
    }

    #[test]
    fn test_log_orders_signals_before_confluence() {
        let mut log = SignalLog::new();
        let appended = log.append_run("default", &run("SPY", "default"));

        let bars: Vec<(usize, bool)> = appended
            .iter()
            .map(|e| {
                (
                    e.event.bar_index(),
                    matches!(e.event, SignalEvent::Confluence(_)),
                )
            })
            .collect();
        assert_eq!(bars, vec![(3, false), (5, false), (5, true), (9, false)]);
        assert_eq!(appended[3].sequence, 3);
    }

    #[test]
    fn test_cursor_paging() {
        let mut log = SignalLog::new();
        log.append_run("default", &run("SPY", "default"));
        log.append_run("default", &run("QQQ", "default"));

        let all = ResultFilter::new();
        let page = log.since(SignalCursor::start(), &all, 3);
        assert_eq!(page.events.len(), 3);
        assert_eq!(page.next.position(), 3);

        let rest = log.since(page.next, &all, 100);
        assert_eq!(rest.events.len(), 5);
        assert_eq!(rest.next.position(), 8);

        let empty = log.since(rest.next, &all, 100);
        assert!(empty.events.is_empty());
        assert_eq!(empty.next, rest.next);

        let qqq = log.since(SignalCursor::start(), &ResultFilter::new().with_symbol("QQQ"), 100);
        assert_eq!(qqq.events.len(), 4);
        assert!(qqq.events.iter().all(|e| e.event.symbol() == "QQQ"));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_result(&record("SPY", "default", false)).unwrap();

        let mut log = SignalLog::new();
        for entry in log.append_run("default", &run("SPY", "default")) {
            sink.write_signal(entry).unwrap();
        }
        sink.flush().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["type"], "result");
        assert_eq!(lines[0]["outcome"]["status"], "failed");
        assert_eq!(lines[1]["type"], "signal");
        assert_eq!(lines[3]["event"]["kind"], "confluence");
    }
}
