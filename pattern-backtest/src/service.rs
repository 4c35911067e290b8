use std::sync::Arc;

use common::{
    BacktestResult, BatchReport, EngineConfig, EngineError, JobRecord, JobRequest, JobSpec, Result,
};
use tracing::{info, warn};

use crate::data::BarProvider;
use crate::results::{
    BatchHandle, LoggedSignal, ResultFilter, ResultSink, ResultStore, SignalCursor, SignalLog,
    SignalPage,
};
use crate::scheduler::{CancelToken, ParallelScheduler};

/// Entry point for the surrounding API layer: job submission, result
/// queries, the pull-based signal feed and persistence hand-off.
pub struct BacktestService {
    scheduler: ParallelScheduler,
    store: ResultStore,
    signals: SignalLog,
    sinks: Vec<Box<dyn ResultSink>>,
}

impl BacktestService {
    pub fn new(config: EngineConfig, provider: Arc<dyn BarProvider>) -> Result<Self> {
        config.validate()?;
        let scheduler = ParallelScheduler::new(config.scheduler, provider, config.strategies)?;
        Ok(Self {
            scheduler,
            store: ResultStore::new(),
            signals: SignalLog::new(),
            sinks: Vec::new(),
        })
    }

    pub fn add_sink(&mut self, sink: Box<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn submit(&mut self, requests: Vec<JobRequest>) -> Result<BatchHandle> {
        self.submit_with_cancel(requests, &CancelToken::new())
    }

    /// Expand the requests (one job per timeframe) and run them as one batch.
    ///
    /// A batch where every job failed is still stored and persisted before
    /// `AllJobsFailed` is returned.
    pub fn submit_with_cancel(
        &mut self,
        requests: Vec<JobRequest>,
        cancel: &CancelToken,
    ) -> Result<BatchHandle> {
        for request in &requests {
            if request.timeframes.is_empty() {
                return Err(EngineError::invalid_config(format!(
                    "request for {} lists no timeframes",
                    request.symbol
                )));
            }
        }
        let jobs: Vec<JobSpec> = requests.iter().flat_map(JobRequest::expand).collect();

        match self.scheduler.run_batch_with_cancel(&jobs, cancel) {
            Ok(report) => Ok(self.record(report)),
            Err(EngineError::AllJobsFailed { failed, report }) => {
                let handle = self.record((*report).clone());
                warn!(%handle, failed, "every job in the batch failed");
                Err(EngineError::AllJobsFailed { failed, report })
            }
            Err(err) => Err(err),
        }
    }

    fn record(&mut self, report: BatchReport) -> BatchHandle {
        let mut logged: Vec<LoggedSignal> = Vec::new();
        for record in &report.records {
            if let Some(run) = record.outcome.run() {
                logged.extend_from_slice(self.signals.append_run(&record.job.strategy_id, run));
            }
        }
        self.persist(&report.records, &logged);

        let jobs = report.records.len();
        let handle = self.store.insert(report);
        info!(%handle, jobs, signals = logged.len(), "batch stored");
        handle
    }

    fn persist(&mut self, records: &[JobRecord], signals: &[LoggedSignal]) {
        for sink in &mut self.sinks {
            if let Err(err) = write_all(sink.as_mut(), records, signals) {
                warn!(%err, "result sink failed");
            }
        }
    }

    pub fn batch(&self, handle: BatchHandle) -> Option<&BatchReport> {
        self.store.batch(handle)
    }

    pub fn query(&self, filter: &ResultFilter) -> Vec<&BacktestResult> {
        self.store.query(filter)
    }

    pub fn records(&self, filter: &ResultFilter) -> Vec<&JobRecord> {
        self.store.records(filter)
    }

    /// Signals and confluence signals logged after `cursor`
    pub fn signals_since(
        &self,
        cursor: SignalCursor,
        filter: &ResultFilter,
        limit: usize,
    ) -> SignalPage {
        self.signals.since(cursor, filter, limit)
    }
}

fn write_all(
    sink: &mut dyn ResultSink,
    records: &[JobRecord],
    signals: &[LoggedSignal],
) -> Result<()> {
    for record in records {
        sink.write_result(record)?;
    }
    for signal in signals {
        sink.write_signal(signal)?;
    }
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_random_walk;
    use crate::data::InMemoryBarProvider;
    use chrono::{TimeZone, Utc};
    use common::{FailureKind, SchedulerConfig, StrategyConfig};
    use std::io::{self, Write};
    use std::sync::Mutex;

    /// Shared buffer so the test can read what the sink wrote
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request(symbol: &str, timeframes: &[&str]) -> JobRequest {
        JobRequest {
            symbol: symbol.to_string(),
            timeframes: timeframes.iter().map(|t| t.to_string()).collect(),
            strategy_id: "default".to_string(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    fn service() -> BacktestService {
        let provider = InMemoryBarProvider::new()
            .with_series(generate_random_walk("SPY", "1D", 250, 100.0, 3).unwrap())
            .with_series(generate_random_walk("SPY", "4H", 250, 100.0, 4).unwrap());
        let config = EngineConfig {
            scheduler: SchedulerConfig::default().with_workers(2),
            strategies: vec![StrategyConfig::default()],
        };
        BacktestService::new(config, Arc::new(provider)).unwrap()
    }

    #[test]
    fn test_submit_expands_timeframes_and_persists() {
        let buffer = SharedBuffer::default();
        let mut service = service().with_sink(Box::new(crate::results::JsonLinesSink::new(
            buffer.clone(),
        )));

        let handle = service
            .submit(vec![request("SPY", &["1D", "4H", "1H"])])
            .unwrap();

        let report = service.batch(handle).unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.success_count(), 2);
        assert_eq!(
            report.records[2].outcome.failure().unwrap().kind,
            FailureKind::EmptyData
        );

        let results = service.query(&ResultFilter::new().with_timeframe("4H"));
        assert_eq!(results.len(), 1);

        let page = service.signals_since(SignalCursor::start(), &ResultFilter::new(), usize::MAX);
        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 3 + page.events.len());
    }

    #[test]
    fn test_all_failed_batch_is_still_stored() {
        let mut service = service();

        let err = service.submit(vec![request("NONE", &["1D"])]).unwrap_err();

        match err {
            EngineError::AllJobsFailed { failed, report } => {
                assert_eq!(failed, 1);
                assert_eq!(report.records.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.records(&ResultFilter::new().with_symbol("NONE")).len(), 1);
    }

    #[test]
    fn test_request_without_timeframes_rejected() {
        let mut service = service();
        let err = service.submit(vec![request("SPY", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_signal_feed_resumes_from_cursor() {
        let mut service = service();
        service.submit(vec![request("SPY", &["1D"])]).unwrap();

        let all = ResultFilter::new();
        let first = service.signals_since(SignalCursor::start(), &all, usize::MAX);
        let caught_up = service.signals_since(first.next, &all, usize::MAX);
        assert!(caught_up.events.is_empty());

        service.submit(vec![request("SPY", &["4H"])]).unwrap();
        let fresh = service.signals_since(first.next, &all, usize::MAX);
        assert!(fresh.events.iter().all(|e| e.event.timeframe() == "4H"));
    }
}
