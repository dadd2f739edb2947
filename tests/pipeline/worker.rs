use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{audience, full_update_body, init_tracing, job_start, join, pipeline, BUYER},
    mock_server::{MockUpdateServer, Route, UpdateRoutes},
};
use anyhow::Result;
use audience_refresh::{AudienceStore, FetchConfig, RunError, RunOutcome};
use chrono::Duration as ChronoDuration;
use hyper::StatusCode;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_refreshes_every_due_audience() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/good", Route::json(full_update_body()));
    routes.insert(
        "/down",
        Route::json("{}").with_status(StatusCode::SERVICE_UNAVAILABLE),
    );
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().thread_pool_size(3).build()?);

    let mut good = Vec::new();
    for i in 0..6 {
        good.push(join(&p.store, audience(&format!("good-{i}"), server.url("/good"))).await);
    }
    let down = join(&p.store, audience("down", server.url("/down"))).await;
    let mut expired = audience("expired", server.url("/good"));
    expired.expiration_time = job_start() - ChronoDuration::minutes(1);
    let expired = join(&p.store, expired).await;

    let outcome = p.worker.run().await?;
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };

    assert_eq!(summary.expired.records_removed, 1);
    assert_eq!(summary.eligible, 7);
    assert_eq!(summary.dispatched, 7);
    assert_eq!(summary.updated, 6);
    assert_eq!(summary.not_updated, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(routes.hits(), 7);

    for row in &good {
        let stored = p.store.audience(&row.key).await?.expect("audience");
        assert_eq!(stored.last_ads_and_bidding_data_updated_time, job_start());
        assert_eq!(stored.ads.as_ref().map(Vec::len), Some(1));
    }
    let down_row = p.store.fetch_data(&down.key).await?.expect("bookkeeping");
    assert_eq!(down_row.num_validation_failures, 1);
    assert!(p.store.audience(&expired.key).await?.is_none());
    assert!(p.store.fetch_data(&expired.key).await?.is_none());

    let snapshot = p.worker.telemetry().snapshot();
    assert_eq!(snapshot.updates_succeeded, 6);
    assert_eq!(snapshot.network_failures, 1);
    assert_eq!(snapshot.audiences_deleted, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_run_skips_audiences_refreshed_by_the_first() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/good", Route::json(full_update_body()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);
    for i in 0..3 {
        join(&p.store, audience(&format!("a-{i}"), server.url("/good"))).await;
    }

    assert!(matches!(p.worker.run().await?, RunOutcome::Completed(s) if s.updated == 3));

    p.clock.advance(Duration::from_secs(60 * 60));
    let RunOutcome::Completed(summary) = p.worker.run().await? else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.eligible, 0);
    assert_eq!(routes.hits(), 3);

    p.clock.advance(Duration::from_secs(24 * 60 * 60));
    let RunOutcome::Completed(summary) = p.worker.run().await? else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.updated, 3);
    assert_eq!(routes.hits(), 6);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_run_is_a_no_op() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert(
        "/slow",
        Route::json(full_update_body()).delayed(Duration::from_millis(150)),
    );
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);
    join(&p.store, audience("slow", server.url("/slow"))).await;

    let worker = Arc::clone(&p.worker);
    let first = tokio::spawn(async move { worker.run().await });
    while !p.worker.is_running() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(p.worker.run().await?, RunOutcome::AlreadyRunning));
    assert!(matches!(first.await??, RunOutcome::Completed(s) if s.updated == 1));
    assert_eq!(routes.hits(), 1);
    assert_eq!(p.worker.telemetry().snapshot().runs_skipped, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_fan_out_hits_the_deadline() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert(
        "/slow",
        Route::json(full_update_body()).delayed(Duration::from_millis(400)),
    );
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(
        FetchConfig::builder()
            .thread_pool_size(1)
            .job_max_runtime(Duration::from_millis(100))
            .build()?,
    );
    for name in ["x", "y"] {
        join(&p.store, audience(name, server.url("/slow"))).await;
    }

    let err = p.worker.run().await.expect_err("run should time out");
    assert!(matches!(err, RunError::Timeout { .. }), "unexpected error {err}");
    assert!(!p.worker.is_running());
    assert_eq!(p.worker.telemetry().snapshot().runs_timed_out, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn foreign_buyer_update_is_not_applied() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    let body = full_update_body().replace(BUYER, "elsewhere.example");
    routes.insert("/foreign", Route::json(body));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);
    let row = join(&p.store, audience("foreign", server.url("/foreign"))).await;

    let RunOutcome::Completed(summary) = p.worker.run().await? else {
        panic!("expected a completed run");
    };
    // User bidding signals carry no URIs, so that section still lands.
    assert_eq!(summary.updated, 1);

    let stored = p.store.audience(&row.key).await?.expect("audience");
    assert_eq!(stored.ads.as_ref().map(Vec::len), Some(0));
    assert_eq!(
        stored.trusted_bidding_data.as_ref().map(|tbd| tbd.keys.clone()),
        Some(vec!["old".to_string()])
    );
    server.shutdown().await;
    Ok(())
}
