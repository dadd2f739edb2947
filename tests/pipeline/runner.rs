use crate::support::{
    helpers::{audience, full_update_body, init_tracing, job_start, join, pipeline, BUYER, DAY},
    mock_server::{MockUpdateServer, Route, UpdateRoutes},
};
use anyhow::Result;
use audience_refresh::{AudienceStore, FetchConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_update_is_merged_and_rescheduled() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/daily", Route::json(full_update_body()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);

    let row = join(&p.store, audience("shoes", server.url("/daily"))).await;
    assert_eq!(row.eligible_update_time, DateTime::<Utc>::UNIX_EPOCH);

    let applied = p.runner.update_custom_audience(job_start(), row.clone()).await?;
    assert!(applied);

    let stored = p
        .store
        .audience(&row.key)
        .await?
        .expect("audience should still exist");
    assert_eq!(stored.user_bidding_signals, Some(json!({ "fresh": true })));
    assert_eq!(
        stored.trusted_bidding_data.as_ref().map(|tbd| tbd.keys.clone()),
        Some(vec!["new".to_string()])
    );
    assert_eq!(stored.ads.as_ref().map(Vec::len), Some(1));
    assert_eq!(stored.last_ads_and_bidding_data_updated_time, job_start());

    let bookkeeping = p
        .store
        .fetch_data(&row.key)
        .await?
        .expect("bookkeeping should exist");
    assert_eq!(
        bookkeeping.eligible_update_time,
        job_start() + ChronoDuration::days(1)
    );
    assert_eq!(bookkeeping.num_validation_failures, 0);

    let snapshot = p.runner.telemetry().snapshot();
    assert_eq!(snapshot.updates_succeeded, 1);
    assert_eq!(snapshot.updates_rejected, 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_update_counts_a_failure_and_keeps_the_schedule() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    let foreign = json!({
        "trusted_bidding_data": {
            "trusted_bidding_uri": "https://other.example/trusted",
            "trusted_bidding_keys": ["k"]
        },
        "user_bidding_signals": "not an object"
    });
    routes.insert("/daily", Route::json(foreign.to_string()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);

    let row = join(&p.store, audience("hats", server.url("/daily"))).await;
    let before = p.store.audience(&row.key).await?.expect("joined");

    let applied = p.runner.update_custom_audience(job_start(), row.clone()).await?;
    assert!(!applied);

    let after = p.store.audience(&row.key).await?.expect("still joined");
    assert_eq!(after, before);

    let bookkeeping = p.store.fetch_data(&row.key).await?.expect("bookkeeping");
    assert_eq!(bookkeeping.num_validation_failures, 1);
    assert_eq!(bookkeeping.eligible_update_time, row.eligible_update_time);

    // A second rejection keeps counting.
    p.runner
        .update_custom_audience(job_start(), bookkeeping)
        .await?;
    let bookkeeping = p.store.fetch_data(&row.key).await?.expect("bookkeeping");
    assert_eq!(bookkeeping.num_validation_failures, 2);
    assert_eq!(p.runner.telemetry().snapshot().updates_rejected, 2);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn success_resets_earlier_failures() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    routes.insert("/daily", Route::json(full_update_body()));
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);

    let mut row = join(&p.store, audience("socks", server.url("/daily"))).await;
    row = row.after_failure().after_failure();
    p.store.update_fetch_data(row.clone()).await?;

    assert!(p.runner.update_custom_audience(job_start(), row.clone()).await?);
    let bookkeeping = p.store.fetch_data(&row.key).await?.expect("bookkeeping");
    assert_eq!(bookkeeping.num_validation_failures, 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_endpoint_is_recorded_as_network_failure() -> Result<()> {
    init_tracing();
    let routes = UpdateRoutes::default();
    let server = MockUpdateServer::start(routes.clone()).await?;
    let p = pipeline(FetchConfig::builder().build()?);

    let row = join(&p.store, audience("gloves", server.url("/nowhere"))).await;
    assert!(!p.runner.update_custom_audience(job_start(), row.clone()).await?);

    let bookkeeping = p.store.fetch_data(&row.key).await?.expect("bookkeeping");
    assert_eq!(bookkeeping.num_validation_failures, 1);
    let snapshot = p.runner.telemetry().snapshot();
    assert_eq!(snapshot.network_failures, 1);
    assert_eq!(snapshot.updates_rejected, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn eligibility_respects_the_update_interval() -> Result<()> {
    init_tracing();
    let p = pipeline(FetchConfig::builder().max_num_updated(10).build()?);

    let mut complete = audience("complete", format!("https://{BUYER}/daily"));
    complete.ads = Some(vec![audience_refresh::AdData::new(
        format!("https://{BUYER}/ads/1"),
        json!({}),
    )]);
    let complete_row = join(&p.store, complete.clone()).await;
    assert_eq!(
        complete_row.eligible_update_time,
        complete.creation_time + ChronoDuration::from_std(DAY)?
    );
    let incomplete_row = join(&p.store, audience("incomplete", format!("https://{BUYER}/d"))).await;

    let due = p.runner.eligible_for_update(job_start()).await?;
    let keys: Vec<_> = due.iter().map(|row| row.key.clone()).collect();
    assert!(keys.contains(&incomplete_row.key));
    assert!(keys.contains(&complete_row.key));

    let before_interval = complete.creation_time + ChronoDuration::hours(1);
    let due = p.runner.eligible_for_update(before_interval).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].key, incomplete_row.key);
    Ok(())
}
