//! Run coordinator for background fetch.
//!
//! A run performs the housekeeping sweeps in order, queries the audiences due
//! for a refresh and fans their updates out over a bounded pool of tasks. At
//! most one run is active per worker; a concurrent call returns
//! [`RunOutcome::AlreadyRunning`] without doing any work.

use crate::background::runner::{BackgroundFetchRunner, DeletionStats};
use crate::model::bookkeeping::FetchBookkeepingRecord;
use crate::runtime::clock::Clock;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Error as AnyError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;


/// Counts gathered by one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub expired: DeletionStats,
    pub disallowed_owners: DeletionStats,
    pub disallowed_buyers: DeletionStats,
    pub app_installs: Option<DeletionStats>,
    pub eligible: usize,
    pub dispatched: usize,
    pub updated: usize,
    pub not_updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was in progress; nothing was done.
    AlreadyRunning,
    Completed(RunSummary),
    /// `stop_work` ended the run early after draining started updates.
    Stopped(RunSummary),
}

#[derive(Debug)]
pub enum RunError {
    /// The fan-out did not finish within the configured runtime. Updates that
    /// already landed stay committed.
    Timeout { limit: Duration },
    /// At least one audience update failed to persist or did not finish.
    UpdateFailures { summary: RunSummary, first: AnyError },
    /// A housekeeping step or the eligibility query failed.
    Housekeeping { step: &'static str, source: AnyError },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Timeout { limit } => {
                write!(f, "background fetch timed out after {limit:?}")
            }
            RunError::UpdateFailures { summary, first } => write!(
                f,
                "{} of {} custom audience updates failed: {first:#}",
                summary.failed, summary.dispatched
            ),
            RunError::Housekeeping { step, source } => {
                write!(f, "background fetch step {step} failed: {source:#}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Timeout { .. } => None,
            RunError::UpdateFailures { first, .. } => Some(first.as_ref()),
            RunError::Housekeeping { source, .. } => Some(source.as_ref()),
        }
    }
}

enum RunState {
    Idle,
    Running { stop: CancellationToken },
}

/// Returns the worker to idle when a run ends, including when the run future
/// is dropped before completion.
struct RunGuard {
    state: Arc<Mutex<RunState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *lock_state(&self.state) = RunState::Idle;
    }
}

#[derive(Default)]
struct FanOutTally {
    dispatched: usize,
    updated: usize,
    not_updated: usize,
    failed: usize,
    first_error: Option<AnyError>,
    stopped: bool,
}

pub struct BackgroundFetchWorker {
    runner: Arc<BackgroundFetchRunner>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<RunState>>,
}

impl BackgroundFetchWorker {
    pub fn new(runner: Arc<BackgroundFetchRunner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            clock,
            state: Arc::new(Mutex::new(RunState::Idle)),
        }
    }

    pub fn runner(&self) -> &Arc<BackgroundFetchRunner> {
        &self.runner
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        self.runner.telemetry()
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock_state(&self.state), RunState::Running { .. })
    }

    /// Performs one background fetch run, or returns immediately if one is
    /// already in progress.
    pub async fn run(&self) -> Result<RunOutcome, RunError> {
        let Some((stop, _guard)) = self.try_begin() else {
            tracing::info!("background fetch already running; skipping");
            self.telemetry().record_run_skipped();
            return Ok(RunOutcome::AlreadyRunning);
        };

        self.telemetry().record_run_started();
        let result = self.execute(&stop).await;
        match &result {
            Ok(RunOutcome::Stopped(summary)) => {
                self.telemetry().record_run_stopped();
                tracing::info!(
                    dispatched = summary.dispatched,
                    eligible = summary.eligible,
                    "background fetch stopped early"
                );
            }
            Ok(RunOutcome::Completed(summary)) => {
                tracing::info!(
                    eligible = summary.eligible,
                    updated = summary.updated,
                    not_updated = summary.not_updated,
                    "background fetch completed"
                );
            }
            Ok(RunOutcome::AlreadyRunning) => {}
            Err(RunError::Timeout { limit }) => {
                self.telemetry().record_run_timed_out();
                tracing::warn!(limit = ?limit, "background fetch timed out");
            }
            Err(err) => {
                self.telemetry().record_run_failed();
                tracing::error!(error = %err, "background fetch failed");
            }
        }
        result
    }

    /// Signals the active run, if any, to stop scheduling new updates.
    /// Updates already started are allowed to finish.
    pub fn stop_work(&self) {
        match &*lock_state(&self.state) {
            RunState::Running { stop } => {
                tracing::info!("stopping background fetch");
                stop.cancel();
            }
            RunState::Idle => {
                tracing::debug!("stop requested with no background fetch running");
            }
        }
    }

    fn try_begin(&self) -> Option<(CancellationToken, RunGuard)> {
        let mut state = lock_state(&self.state);
        if matches!(*state, RunState::Running { .. }) {
            return None;
        }

        let stop = CancellationToken::new();
        *state = RunState::Running { stop: stop.clone() };
        Some((
            stop,
            RunGuard {
                state: Arc::clone(&self.state),
            },
        ))
    }

    async fn execute(&self, stop: &CancellationToken) -> Result<RunOutcome, RunError> {
        let job_start = self.clock.now();
        let config = self.runner.config();
        let mut summary = RunSummary::default();

        tracing::info!(job_start = %job_start, "starting background fetch");

        summary.expired = housekeeping(
            "delete_expired",
            self.runner.delete_expired_custom_audiences(job_start),
        )
        .await?;
        summary.disallowed_owners = housekeeping(
            "delete_disallowed_owners",
            self.runner.delete_disallowed_owner_custom_audiences(),
        )
        .await?;
        summary.disallowed_buyers = housekeeping(
            "delete_disallowed_buyers",
            self.runner.delete_disallowed_buyer_custom_audiences(),
        )
        .await?;
        if config.app_install_filtering_enabled() {
            summary.app_installs = Some(
                housekeeping(
                    "delete_disallowed_app_installs",
                    self.runner.delete_disallowed_package_app_install_entries(),
                )
                .await?,
            );
        }

        let eligible = housekeeping(
            "query_eligible",
            self.runner.eligible_for_update(job_start),
        )
        .await?;
        summary.eligible = eligible.len();

        if stop.is_cancelled() {
            return Ok(RunOutcome::Stopped(summary));
        }
        if eligible.is_empty() {
            tracing::info!("no custom audiences eligible for update");
            return Ok(RunOutcome::Completed(summary));
        }

        let limit = config.job_max_runtime();
        let tally = timeout(limit, self.fan_out(job_start, eligible, stop))
            .await
            .map_err(|_| RunError::Timeout { limit })?;

        summary.dispatched = tally.dispatched;
        summary.updated = tally.updated;
        summary.not_updated = tally.not_updated;
        summary.failed = tally.failed;

        if let Some(first) = tally.first_error {
            return Err(RunError::UpdateFailures { summary, first });
        }
        if tally.stopped {
            return Ok(RunOutcome::Stopped(summary));
        }
        Ok(RunOutcome::Completed(summary))
    }

    /// Dispatches one task per record, at most `thread_pool_size` at a time,
    /// and waits for every dispatched task. Dropping this future detaches the
    /// tasks already dispatched instead of aborting them.
    async fn fan_out(
        &self,
        job_start: DateTime<Utc>,
        records: Vec<FetchBookkeepingRecord>,
        stop: &CancellationToken,
    ) -> FanOutTally {
        let pool_size = self.runner.config().thread_pool_size();
        let permits = Arc::new(Semaphore::new(pool_size));
        let mut tally = FanOutTally::default();
        let mut handles = Vec::with_capacity(records.len());

        tracing::info!(
            eligible = records.len(),
            pool_size,
            "dispatching custom audience updates"
        );

        for record in records {
            if stop.is_cancelled() {
                tally.stopped = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tally.stopped = true;
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(err) => {
                        tracing::error!(error = %err, "update pool closed unexpectedly");
                        break;
                    }
                },
            };

            let runner = Arc::clone(&self.runner);
            let key = record.key.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                runner.update_custom_audience(job_start, record).await
            });
            handles.push((key, handle));
        }

        tally.dispatched = handles.len();
        let results = join_all(
            handles
                .into_iter()
                .map(|(key, handle)| async move { (key, handle.await) }),
        )
        .await;

        for (key, result) in results {
            let error = match result {
                Ok(Ok(true)) => {
                    tally.updated += 1;
                    continue;
                }
                Ok(Ok(false)) => {
                    tally.not_updated += 1;
                    continue;
                }
                Ok(Err(err)) => err,
                Err(join_err) if join_err.is_panic() => {
                    let panic_msg = panic_message(join_err.into_panic().as_ref());
                    anyhow!("update task for {key} panicked: {panic_msg}")
                }
                Err(join_err) => anyhow!("update task for {key} did not finish: {join_err}"),
            };

            tracing::warn!(audience = %key, error = %error, "custom audience update failed");
            self.telemetry().record_update_failure();
            tally.failed += 1;
            if tally.first_error.is_none() {
                tally.first_error = Some(error);
            }
        }

        tally
    }
}

async fn housekeeping<T, F>(step: &'static str, work: F) -> Result<T, RunError>
where
    F: Future<Output = Result<T>>,
{
    work.await
        .map_err(|source| RunError::Housekeeping { step, source })
}

fn lock_state(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
