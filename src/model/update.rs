use crate::model::audience::{AdData, TrustedBiddingData};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// Classification of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateResult {
    Success,
    NetworkFailure,
    /// Malformed target URI or an outcome that could not be classified.
    Unknown,
}

impl UpdateResult {
    pub fn is_success(self) -> bool {
        matches!(self, UpdateResult::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateResult::Success => "SUCCESS",
            UpdateResult::NetworkFailure => "NETWORK_FAILURE",
            UpdateResult::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one fetched update document.
///
/// Values are only built through [`UpdatableData::successful`] and
/// [`UpdatableData::unsuccessful`], so an unsuccessful update never carries
/// any section.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatableData {
    user_bidding_signals: Option<Value>,
    trusted_bidding_data: Option<TrustedBiddingData>,
    ads: Option<Vec<AdData>>,
    attempted_update_time: DateTime<Utc>,
    initial_update_result: UpdateResult,
    contains_successful_update: bool,
}

impl UpdatableData {
    /// A successful fetch whose surviving sections are applied. All three may
    /// be absent when the document legitimately declared nothing.
    pub fn successful(
        attempted_update_time: DateTime<Utc>,
        user_bidding_signals: Option<Value>,
        trusted_bidding_data: Option<TrustedBiddingData>,
        ads: Option<Vec<AdData>>,
    ) -> Self {
        Self {
            user_bidding_signals,
            trusted_bidding_data,
            ads,
            attempted_update_time,
            initial_update_result: UpdateResult::Success,
            contains_successful_update: true,
        }
    }

    /// An attempt that produced nothing usable, either because the fetch
    /// failed or because every declared section was rejected.
    pub fn unsuccessful(
        attempted_update_time: DateTime<Utc>,
        initial_update_result: UpdateResult,
    ) -> Self {
        Self {
            user_bidding_signals: None,
            trusted_bidding_data: None,
            ads: None,
            attempted_update_time,
            initial_update_result,
            contains_successful_update: false,
        }
    }

    pub fn user_bidding_signals(&self) -> Option<&Value> {
        self.user_bidding_signals.as_ref()
    }

    pub fn trusted_bidding_data(&self) -> Option<&TrustedBiddingData> {
        self.trusted_bidding_data.as_ref()
    }

    pub fn ads(&self) -> Option<&[AdData]> {
        self.ads.as_deref()
    }

    pub fn attempted_update_time(&self) -> DateTime<Utc> {
        self.attempted_update_time
    }

    pub fn initial_update_result(&self) -> UpdateResult {
        self.initial_update_result
    }

    pub fn contains_successful_update(&self) -> bool {
        self.contains_successful_update
    }
}
