//! Parallel batch execution of independent backtest jobs
//!
//! Every job owns its series, detectors and portfolio. Workers share only the
//! read-only provider and strategy table; progress flows back over a channel
//! to a single collector, which files results by submission slot and enforces
//! both time limits without waiting on a stuck job.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    BacktestRun, BarSeries, BatchReport, EngineError, JobFailure, JobOutcome, JobRecord, JobSpec,
    LatestScan, Result, SchedulerConfig, ScreeningOutcome, ScreeningRecord, ScreeningReport,
    StrategyConfig,
};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::data::BarProvider;
use crate::engine::BacktestEngine;
use crate::scanner::{panic_message, Scanner};

/// Cooperative cancellation flag, checked before each job starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct ParallelScheduler {
    config: SchedulerConfig,
    provider: Arc<dyn BarProvider>,
    strategies: Arc<HashMap<String, StrategyConfig>>,
    pool: ThreadPool,
}

impl ParallelScheduler {
    /// Fails only on batch-level configuration errors such as zero workers.
    /// Strategy problems surface as failures of the jobs that use them.
    pub fn new(
        config: SchedulerConfig,
        provider: Arc<dyn BarProvider>,
        strategies: Vec<StrategyConfig>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("backtest-worker-{i}"))
            .build()
            .map_err(|e| EngineError::invalid_config(format!("worker pool: {e}")))?;

        let strategies = strategies
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            config,
            provider,
            strategies: Arc::new(strategies),
            pool,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn run_batch(&self, jobs: &[JobSpec]) -> Result<BatchReport> {
        self.run_batch_with_cancel(jobs, &CancelToken::new())
    }

    /// Run every job and report each one, in submission order.
    ///
    /// Returns `AllJobsFailed` only when a non-empty batch has no success.
    pub fn run_batch_with_cancel(
        &self,
        jobs: &[JobSpec],
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        let task: Arc<Task<BacktestRun>> =
            Arc::new(|strategy: &StrategyConfig, series: &BarSeries| -> Result<BacktestRun> {
                BacktestEngine::new(strategy.clone())?.run(series)
            });
        let (settled, elapsed_ms) = self.dispatch(jobs, cancel, task);

        let records: Vec<JobRecord> = jobs
            .iter()
            .zip(settled)
            .map(|(job, settled)| JobRecord {
                job: job.clone(),
                outcome: match settled.outcome {
                    Ok(run) => JobOutcome::Completed(Box::new(run)),
                    Err(failure) => JobOutcome::Failed(failure),
                },
                elapsed_ms: settled.elapsed_ms,
            })
            .collect();

        let report = BatchReport {
            records,
            elapsed_ms,
        };
        let failed = report.failure_count();

        info!(
            jobs = report.records.len(),
            succeeded = report.success_count(),
            failed,
            elapsed_ms,
            "batch finished"
        );

        if failed > 0 && failed == report.records.len() {
            return Err(EngineError::AllJobsFailed {
                failed,
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    pub fn run_screening(&self, jobs: &[JobSpec], lookback_bars: usize) -> Result<ScreeningReport> {
        self.run_screening_with_cancel(jobs, lookback_bars, &CancelToken::new())
    }

    /// Scan every job's series and keep the signals of its last
    /// `lookback_bars` bars. No trades are simulated.
    ///
    /// Same isolation and ordering as `run_batch`; returns
    /// `AllScreensFailed` when a non-empty batch has no success.
    pub fn run_screening_with_cancel(
        &self,
        jobs: &[JobSpec],
        lookback_bars: usize,
        cancel: &CancelToken,
    ) -> Result<ScreeningReport> {
        if lookback_bars == 0 {
            return Err(EngineError::invalid_config(
                "screening lookback must be at least one bar",
            ));
        }

        let task: Arc<Task<LatestScan>> = Arc::new(
            move |strategy: &StrategyConfig, series: &BarSeries| -> Result<LatestScan> {
                if series.is_empty() {
                    return Err(EngineError::EmptyData {
                        symbol: series.symbol().to_string(),
                        timeframe: series.timeframe().to_string(),
                    });
                }
                Ok(Scanner::new(strategy)?.scan(series)?.snapshot(lookback_bars))
            },
        );
        let (settled, elapsed_ms) = self.dispatch(jobs, cancel, task);

        let records: Vec<ScreeningRecord> = jobs
            .iter()
            .zip(settled)
            .map(|(job, settled)| ScreeningRecord {
                job: job.clone(),
                outcome: match settled.outcome {
                    Ok(latest) => ScreeningOutcome::Screened(latest),
                    Err(failure) => ScreeningOutcome::Failed(failure),
                },
                elapsed_ms: settled.elapsed_ms,
            })
            .collect();

        let report = ScreeningReport {
            records,
            elapsed_ms,
        };
        let failed = report.failure_count();

        info!(
            jobs = report.records.len(),
            hits = report.hits().count(),
            failed,
            elapsed_ms,
            "screening finished"
        );

        if failed > 0 && failed == report.records.len() {
            return Err(EngineError::AllScreensFailed {
                failed,
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    /// Fan `jobs` out to the pool and collect one settled outcome per slot.
    ///
    /// The collector wakes at the batch deadline or when the oldest running
    /// job reaches its time limit, whichever comes first. An overrunning job
    /// is recorded as `Timeout` and left to finish on its pool thread; its
    /// late result is dropped.
    fn dispatch<T: Send + 'static>(
        &self,
        jobs: &[JobSpec],
        cancel: &CancelToken,
        task: Arc<Task<T>>,
    ) -> (Vec<Settled<T>>, u64) {
        let started = Instant::now();
        let batch_deadline = self
            .config
            .batch_timeout_ms
            .map(|ms| started + Duration::from_millis(ms));
        let job_limit = self.config.job_timeout_ms.map(Duration::from_millis);

        info!(
            jobs = jobs.len(),
            workers = self.config.workers,
            "batch started"
        );

        let (tx, rx) = mpsc::channel::<Progress<T>>();
        for (slot, job) in jobs.iter().enumerate() {
            let tx = tx.clone();
            let worker = Worker {
                provider: Arc::clone(&self.provider),
                strategies: Arc::clone(&self.strategies),
                cancel: cancel.clone(),
                batch_started: started,
                batch_timeout_ms: self.config.batch_timeout_ms,
                job_timeout_ms: self.config.job_timeout_ms,
                task: Arc::clone(&task),
            };
            let job = job.clone();
            self.pool.spawn(move || {
                // The collector is gone once the batch deadline has passed
                let _ = tx.send(Progress::Started {
                    slot,
                    at: Instant::now(),
                });
                let settled = worker.execute(&job);
                let _ = tx.send(Progress::Finished { slot, settled });
            });
        }
        drop(tx);

        let mut slots: Vec<Option<Settled<T>>> = (0..jobs.len()).map(|_| None).collect();
        let mut running: HashMap<usize, Instant> = HashMap::new();
        let mut filled = 0;
        while filled < jobs.len() {
            let overrun_at = job_limit
                .and_then(|limit| running.values().min().map(|&at| at + limit));
            let wake = match (batch_deadline, overrun_at) {
                (Some(deadline), Some(overrun)) => Some(deadline.min(overrun)),
                (deadline, overrun) => deadline.or(overrun),
            };
            let message = match wake {
                Some(wake) => rx.recv_timeout(wake.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(Progress::Started { slot, at }) => {
                    if slots[slot].is_none() {
                        running.insert(slot, at);
                    }
                }
                Ok(Progress::Finished { slot, settled }) => {
                    running.remove(&slot);
                    if slots[slot].is_none() {
                        slots[slot] = Some(settled);
                        filled += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if batch_deadline.is_some_and(|deadline| now >= deadline) {
                        break;
                    }
                    let Some(limit) = job_limit else {
                        continue;
                    };
                    let overdue: Vec<(usize, Instant)> = running
                        .iter()
                        .filter(|&(_, &at)| now.duration_since(at) >= limit)
                        .map(|(&slot, &at)| (slot, at))
                        .collect();
                    for (slot, at) in overdue {
                        running.remove(&slot);
                        let err = EngineError::Timeout {
                            elapsed_ms: now.duration_since(at).as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        };
                        warn!(job = %jobs[slot].label(), %err, "job abandoned after overrunning");
                        slots[slot] = Some(Settled {
                            outcome: Err(JobFailure::from(&err)),
                            elapsed_ms: now.duration_since(at).as_millis() as u64,
                        });
                        filled += 1;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let settled = slots
            .into_iter()
            .zip(jobs)
            .map(|(settled, job)| {
                settled.unwrap_or_else(|| {
                    let err = EngineError::Timeout {
                        elapsed_ms,
                        limit_ms: self.config.batch_timeout_ms.unwrap_or_default(),
                    };
                    warn!(job = %job.label(), %err, "job did not finish before the batch deadline");
                    Settled {
                        outcome: Err(JobFailure::from(&err)),
                        elapsed_ms,
                    }
                })
            })
            .collect();

        (settled, elapsed_ms)
    }
}

/// Work done for one job once its series is fetched
type Task<T> = dyn Fn(&StrategyConfig, &BarSeries) -> Result<T> + Send + Sync;

/// Worker-to-collector messages
enum Progress<T> {
    Started { slot: usize, at: Instant },
    Finished { slot: usize, settled: Settled<T> },
}

struct Settled<T> {
    outcome: std::result::Result<T, JobFailure>,
    elapsed_ms: u64,
}

/// Read-only context handed to one worker task
struct Worker<T> {
    provider: Arc<dyn BarProvider>,
    strategies: Arc<HashMap<String, StrategyConfig>>,
    cancel: CancelToken,
    batch_started: Instant,
    batch_timeout_ms: Option<u64>,
    job_timeout_ms: Option<u64>,
    task: Arc<Task<T>>,
}

impl<T> Worker<T> {
    fn execute(&self, job: &JobSpec) -> Settled<T> {
        let started = Instant::now();
        let outcome = self.run(job).map_err(|err| {
            warn!(
                job = %job.label(),
                kind = ?err.failure_kind(),
                %err,
                "job failed"
            );
            JobFailure::from(&err)
        });

        Settled {
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn run(&self, job: &JobSpec) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(limit_ms) = self.batch_timeout_ms {
            let elapsed_ms = self.batch_started.elapsed().as_millis() as u64;
            if elapsed_ms >= limit_ms {
                return Err(EngineError::Timeout {
                    elapsed_ms,
                    limit_ms,
                });
            }
        }

        let strategy = self.strategies.get(&job.strategy_id).ok_or_else(|| {
            EngineError::invalid_config(format!("unknown strategy '{}'", job.strategy_id))
        })?;

        let started = Instant::now();
        let value = panic::catch_unwind(AssertUnwindSafe(|| {
            let series = self
                .provider
                .fetch(&job.symbol, &job.timeframe, &job.range)?;
            (self.task)(strategy, &series)
        }))
        .map_err(|payload| EngineError::JobPanicked {
            job: job.label(),
            message: panic_message(payload.as_ref()),
        })??;

        // Overruns the collector did not catch in time
        if let Some(limit_ms) = self.job_timeout_ms {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if elapsed_ms > limit_ms {
                return Err(EngineError::Timeout {
                    elapsed_ms,
                    limit_ms,
                });
            }
        }

        Ok(value)
    }
}
