//! Concrete work items scheduled by the background fetch worker: the
//! housekeeping sweeps and the per-audience fetch, validate and persist step.

use crate::background::policy::{BuyerEnrollment, OwnerPolicy};
use crate::fetch::client::{parse_update_uri, UpdateSource};
use crate::model::bookkeeping::FetchBookkeepingRecord;
use crate::model::update::{UpdatableData, UpdateResult};
use crate::runtime::config::FetchConfig;
use crate::runtime::telemetry::Telemetry;
use crate::store::AudienceStore;
use crate::validation::build_updatable_data;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Counts reported by one housekeeping sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeletionStats {
    /// Audiences (or app-install entries) removed.
    pub records_removed: usize,
    /// Distinct owners, buyers or packages found disallowed.
    pub subjects_removed: usize,
}

pub struct BackgroundFetchRunner {
    store: Arc<dyn AudienceStore>,
    source: Arc<dyn UpdateSource>,
    owner_policy: Arc<dyn OwnerPolicy>,
    buyer_enrollment: Arc<dyn BuyerEnrollment>,
    config: Arc<FetchConfig>,
    telemetry: Arc<Telemetry>,
}

pub struct BackgroundFetchRunnerParams {
    pub store: Arc<dyn AudienceStore>,
    pub source: Arc<dyn UpdateSource>,
    pub owner_policy: Arc<dyn OwnerPolicy>,
    pub buyer_enrollment: Arc<dyn BuyerEnrollment>,
    pub config: Arc<FetchConfig>,
    pub telemetry: Arc<Telemetry>,
}

impl BackgroundFetchRunner {
    pub fn new(params: BackgroundFetchRunnerParams) -> Self {
        Self {
            store: params.store,
            source: params.source,
            owner_policy: params.owner_policy,
            buyer_enrollment: params.buyer_enrollment,
            config: params.config,
            telemetry: params.telemetry,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub async fn delete_expired_custom_audiences(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DeletionStats> {
        let removed = self
            .store
            .delete_expired(now)
            .await
            .context("failed to delete expired custom audiences")?;
        self.telemetry.record_audiences_deleted(removed);
        tracing::debug!(removed, "deleted expired custom audiences");
        Ok(DeletionStats {
            records_removed: removed,
            subjects_removed: 0,
        })
    }

    pub async fn delete_disallowed_owner_custom_audiences(&self) -> Result<DeletionStats> {
        let owners = self
            .store
            .owners()
            .await
            .context("failed to list custom audience owners")?;
        let disallowed: Vec<String> = owners
            .into_iter()
            .filter(|owner| !self.owner_policy.is_owner_allowed(owner))
            .collect();
        if disallowed.is_empty() {
            return Ok(DeletionStats::default());
        }

        let subjects_removed = disallowed.len();
        let removed = self
            .store
            .delete_owners(disallowed)
            .await
            .context("failed to delete custom audiences of disallowed owners")?;
        self.telemetry.record_audiences_deleted(removed);
        tracing::debug!(
            owners = subjects_removed,
            removed,
            "deleted custom audiences of disallowed owners"
        );
        Ok(DeletionStats {
            records_removed: removed,
            subjects_removed,
        })
    }

    /// Skipped entirely when enrollment checks are disabled.
    pub async fn delete_disallowed_buyer_custom_audiences(&self) -> Result<DeletionStats> {
        if !self.config.enrollment_check_enabled() {
            tracing::debug!("enrollment check disabled; keeping audiences of every buyer");
            return Ok(DeletionStats::default());
        }

        let buyers = self
            .store
            .buyers()
            .await
            .context("failed to list custom audience buyers")?;
        let disallowed: Vec<String> = buyers
            .into_iter()
            .filter(|buyer| !self.buyer_enrollment.is_buyer_enrolled(buyer))
            .collect();
        if disallowed.is_empty() {
            return Ok(DeletionStats::default());
        }

        let subjects_removed = disallowed.len();
        let removed = self
            .store
            .delete_buyers(disallowed)
            .await
            .context("failed to delete custom audiences of unenrolled buyers")?;
        self.telemetry.record_audiences_deleted(removed);
        tracing::debug!(
            buyers = subjects_removed,
            removed,
            "deleted custom audiences of unenrolled buyers"
        );
        Ok(DeletionStats {
            records_removed: removed,
            subjects_removed,
        })
    }

    pub async fn delete_disallowed_package_app_install_entries(&self) -> Result<DeletionStats> {
        let packages = self
            .store
            .app_install_packages()
            .await
            .context("failed to list app install packages")?;
        let disallowed: Vec<String> = packages
            .into_iter()
            .filter(|package| !self.owner_policy.is_owner_allowed(package))
            .collect();
        if disallowed.is_empty() {
            return Ok(DeletionStats::default());
        }

        let subjects_removed = disallowed.len();
        let removed = self
            .store
            .delete_app_install_packages(disallowed)
            .await
            .context("failed to delete app install entries of disallowed packages")?;
        tracing::debug!(
            packages = subjects_removed,
            removed,
            "deleted app install entries of disallowed packages"
        );
        Ok(DeletionStats {
            records_removed: removed,
            subjects_removed,
        })
    }

    pub async fn eligible_for_update(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FetchBookkeepingRecord>> {
        self.store
            .eligible_for_update(now, self.config.max_num_updated())
            .await
            .context("failed to query custom audiences eligible for update")
    }

    /// Downloads and validates one update document. Never fails: network and
    /// URI problems are reported through the initial update result.
    pub async fn fetch_and_validate_custom_audience_updatable_data(
        &self,
        attempted_update_time: DateTime<Utc>,
        buyer: &str,
        update_uri: &str,
    ) -> UpdatableData {
        let fetched = match parse_update_uri(update_uri) {
            Ok(uri) => self.source.fetch_update(&uri).await,
            Err(err) => Err(err),
        };

        match fetched {
            Ok(body) => build_updatable_data(
                &body,
                attempted_update_time,
                UpdateResult::Success,
                buyer,
                &self.config.reader_limits(),
            ),
            Err(err) => {
                let result = err.update_result();
                tracing::debug!(
                    buyer,
                    uri = update_uri,
                    result = %result,
                    error = %err,
                    "custom audience update fetch failed"
                );
                UpdatableData::unsuccessful(attempted_update_time, result)
            }
        }
    }

    /// Refreshes one audience and persists exactly one of the two outcomes.
    ///
    /// Returns whether the audience data was updated. Store errors propagate.
    pub async fn update_custom_audience(
        &self,
        job_start: DateTime<Utc>,
        bookkeeping: FetchBookkeepingRecord,
    ) -> Result<bool> {
        let update = self
            .fetch_and_validate_custom_audience_updatable_data(
                job_start,
                &bookkeeping.key.buyer,
                &bookkeeping.daily_update_uri,
            )
            .await;
        let applied = update.contains_successful_update();
        self.telemetry
            .record_update_attempt(update.initial_update_result(), applied);

        if applied {
            let next = bookkeeping.after_success(job_start, self.config.update_interval());
            tracing::debug!(
                audience = %bookkeeping.key,
                next_eligible = %next.eligible_update_time,
                "custom audience updated"
            );
            self.store
                .update_audience_and_fetch_data(update, next)
                .await
                .with_context(|| format!("failed to persist update for {}", bookkeeping.key))?;
        } else {
            let next = bookkeeping.after_failure();
            tracing::debug!(
                audience = %bookkeeping.key,
                result = %update.initial_update_result(),
                failures = next.num_validation_failures,
                "custom audience update rejected"
            );
            self.store
                .update_fetch_data(next)
                .await
                .with_context(|| {
                    format!("failed to persist fetch bookkeeping for {}", bookkeeping.key)
                })?;
        }

        Ok(applied)
    }
}
