use crate::background::worker::{BackgroundFetchWorker, RunError, RunOutcome};
use crate::runtime::config::FetchConfig;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Terminal signal reported for one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    AlreadyRunning,
    Stopped,
    TimedOut,
    Failed,
    Disabled,
}

impl JobOutcome {
    pub fn code(self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "SUCCESS",
            JobOutcome::AlreadyRunning => "SKIPPED_ALREADY_RUNNING",
            JobOutcome::Stopped => "STOPPED",
            JobOutcome::TimedOut => "TIMEOUT",
            JobOutcome::Failed => "FAILURE",
            JobOutcome::Disabled => "SKIPPED_DISABLED",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobExecution {
    pub outcome: JobOutcome,
    pub duration: Duration,
    /// Whether the caller should ask for an immediate retry. Failed audiences
    /// are retried through their bookkeeping on the next periodic run.
    pub reschedule: bool,
}

/// Periodic trigger for a [`BackgroundFetchWorker`] with graceful shutdown.
pub struct BackgroundFetchJob {
    worker: Arc<BackgroundFetchWorker>,
    config: Arc<FetchConfig>,
    shutdown: CancellationToken,
}

impl BackgroundFetchJob {
    pub fn new(worker: Arc<BackgroundFetchWorker>, config: Arc<FetchConfig>) -> Self {
        Self {
            worker,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the worker once and reports the terminal signal with telemetry.
    pub async fn run_once(&self) -> JobExecution {
        let started = Instant::now();
        if !self.config.background_fetch_enabled() {
            tracing::info!("background fetch disabled; skipping job");
            return self.finish(JobOutcome::Disabled, started.elapsed());
        }

        let outcome = match self.worker.run().await {
            Ok(RunOutcome::Completed(_)) => JobOutcome::Succeeded,
            Ok(RunOutcome::AlreadyRunning) => JobOutcome::AlreadyRunning,
            Ok(RunOutcome::Stopped(_)) => JobOutcome::Stopped,
            Err(RunError::Timeout { .. }) => JobOutcome::TimedOut,
            Err(_) => JobOutcome::Failed,
        };
        self.finish(outcome, started.elapsed())
    }

    /// Runs the job every `job_period` until the shutdown token is cancelled.
    /// A run in flight at shutdown is stopped and drained before returning.
    pub async fn run_periodically(&self) -> Result<()> {
        let mut ticker = time::interval(self.config.job_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("background fetch job shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let run = self.run_once();
            tokio::pin!(run);
            let execution = tokio::select! {
                execution = &mut run => execution,
                _ = self.shutdown.cancelled() => {
                    self.worker.stop_work();
                    run.await
                }
            };

            if execution.outcome == JobOutcome::Disabled {
                return Ok(());
            }
        }
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        tracing::info!("background fetch job started; waiting for Ctrl-C (SIGINT) to stop");

        let periodic = self.run_periodically();
        tokio::pin!(periodic);

        tokio::select! {
            result = &mut periodic => return result,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; stopping background fetch job");
            }
        }

        self.shutdown.cancel();
        periodic.await
    }

    fn finish(&self, outcome: JobOutcome, duration: Duration) -> JobExecution {
        self.worker.telemetry().record_job_execution(duration);
        tracing::info!(
            outcome = %outcome,
            duration_ms = duration.as_millis() as u64,
            "background fetch job finished"
        );
        JobExecution {
            outcome,
            duration,
            reschedule: false,
        }
    }
}
