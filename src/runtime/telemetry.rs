use crate::model::update::UpdateResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the job, the worker and the runner.
#[derive(Default, Debug)]
pub struct Telemetry {
    runs_started: AtomicU64,
    runs_skipped: AtomicU64,
    runs_stopped: AtomicU64,
    runs_timed_out: AtomicU64,
    runs_failed: AtomicU64,
    updates_succeeded: AtomicU64,
    updates_rejected: AtomicU64,
    updates_failed: AtomicU64,
    network_failures: AtomicU64,
    unknown_results: AtomicU64,
    audiences_deleted: AtomicU64,
    job_executions: AtomicU64,
    job_duration_ns: AtomicU64,
}

impl Telemetry {
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_skipped(&self) {
        self.runs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_stopped(&self) {
        self.runs_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_timed_out(&self) {
        self.runs_timed_out.fetch_add(1, Ordering::Relaxed);
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one fetch-and-validate attempt.
    pub fn record_update_attempt(&self, result: UpdateResult, applied: bool) {
        match result {
            UpdateResult::NetworkFailure => {
                self.network_failures.fetch_add(1, Ordering::Relaxed);
            }
            UpdateResult::Unknown => {
                self.unknown_results.fetch_add(1, Ordering::Relaxed);
            }
            UpdateResult::Success => {}
        }

        if applied {
            self.updates_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updates_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an update that could not be persisted or did not finish.
    pub fn record_update_failure(&self) {
        self.updates_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audiences_deleted(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.audiences_deleted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_job_execution(&self, duration: Duration) {
        self.job_executions.fetch_add(1, Ordering::Relaxed);
        self.job_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let job_executions = self.job_executions.load(Ordering::Relaxed);
        let job_duration_ns = self.job_duration_ns.load(Ordering::Relaxed);
        let average_job_duration_ms = if job_executions == 0 {
            0.0
        } else {
            (job_duration_ns as f64 / job_executions as f64) / 1_000_000.0
        };

        TelemetrySnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            runs_stopped: self.runs_stopped.load(Ordering::Relaxed),
            runs_timed_out: self.runs_timed_out.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            updates_succeeded: self.updates_succeeded.load(Ordering::Relaxed),
            updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
            updates_failed: self.updates_failed.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            unknown_results: self.unknown_results.load(Ordering::Relaxed),
            audiences_deleted: self.audiences_deleted.load(Ordering::Relaxed),
            job_executions,
            average_job_duration_ms,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub runs_started: u64,
    pub runs_skipped: u64,
    pub runs_stopped: u64,
    pub runs_timed_out: u64,
    pub runs_failed: u64,
    pub updates_succeeded: u64,
    pub updates_rejected: u64,
    pub updates_failed: u64,
    pub network_failures: u64,
    pub unknown_results: u64,
    pub audiences_deleted: u64,
    pub job_executions: u64,
    pub average_job_duration_ms: f64,
}
