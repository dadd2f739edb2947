use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{audience, full_update_body, init_tracing, join, pipeline},
    mock_server::{MockUpdateServer, Route, UpdateRoutes},
};
use anyhow::Result;
use audience_refresh::{AudienceStore, BackgroundFetchJob, FetchConfig, JobOutcome};
use tokio::time::{sleep, timeout, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_execution_reports_success() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/daily", Route::json(full_update_body()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);
    let row = join(&p.store, audience("shoes", server.url("/daily"))).await;

    let job = BackgroundFetchJob::new(Arc::clone(&p.worker), Arc::clone(&p.config));
    let execution = job.run_once().await;

    assert_eq!(execution.outcome, JobOutcome::Succeeded);
    assert!(!execution.reschedule);
    assert_eq!(routes.hits(), 1);
    let bookkeeping = p.store.fetch_data(&row.key).await?.expect("bookkeeping");
    assert_eq!(bookkeeping.num_validation_failures, 0);

    let snapshot = p.worker.telemetry().snapshot();
    assert_eq!(snapshot.job_executions, 1);
    assert_eq!(snapshot.runs_started, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn disabled_job_does_no_work() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(
        FetchConfig::builder()
            .background_fetch_enabled(false)
            .build()?,
    );
    join(&p.store, audience("shoes", server.url("/daily"))).await;

    let job = BackgroundFetchJob::new(Arc::clone(&p.worker), Arc::clone(&p.config));
    let execution = job.run_once().await;

    assert_eq!(execution.outcome, JobOutcome::Disabled);
    assert_eq!(execution.outcome.code(), "SKIPPED_DISABLED");
    assert_eq!(routes.hits(), 0);
    assert_eq!(p.worker.telemetry().snapshot().runs_started, 0);

    // The periodic loop exits on its own when the feature is off.
    timeout(Duration::from_secs(5), job.run_periodically()).await??;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_job_stops_on_cancellation() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/daily", Route::json(full_update_body()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(
        FetchConfig::builder()
            .job_period(Duration::from_secs(3600))
            .build()?,
    );
    join(&p.store, audience("shoes", server.url("/daily"))).await;

    let job = Arc::new(BackgroundFetchJob::new(
        Arc::clone(&p.worker),
        Arc::clone(&p.config),
    ));
    let token = job.cancellation_token();
    let handle = tokio::spawn({
        let job = Arc::clone(&job);
        async move { job.run_periodically().await }
    });

    // The first tick fires immediately.
    let deadline = Instant::now() + Duration::from_secs(5);
    while p.worker.telemetry().snapshot().job_executions == 0 {
        assert!(Instant::now() < deadline, "first execution never finished");
        sleep(Duration::from_millis(10)).await;
    }

    token.cancel();
    timeout(Duration::from_secs(5), handle).await???;

    assert_eq!(p.worker.telemetry().snapshot().job_executions, 1);
    assert!(!p.worker.is_running());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_a_run_in_flight() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert(
        "/slow",
        Route::json(full_update_body()).delayed(Duration::from_millis(200)),
    );
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().thread_pool_size(1).build()?);
    for name in ["a", "b", "c", "d"] {
        join(&p.store, audience(name, server.url("/slow"))).await;
    }

    let job = Arc::new(BackgroundFetchJob::new(
        Arc::clone(&p.worker),
        Arc::clone(&p.config),
    ));
    let token = job.cancellation_token();
    let handle = tokio::spawn({
        let job = Arc::clone(&job);
        async move { job.run_periodically().await }
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while routes.hits() == 0 {
        assert!(Instant::now() < deadline, "run never reached the network");
        sleep(Duration::from_millis(5)).await;
    }
    token.cancel();
    timeout(Duration::from_secs(5), handle).await???;

    let snapshot = p.worker.telemetry().snapshot();
    assert_eq!(snapshot.runs_stopped, 1);
    assert_eq!(snapshot.job_executions, 1);
    assert!(routes.hits() < 4);
    server.shutdown().await;
    Ok(())
}
