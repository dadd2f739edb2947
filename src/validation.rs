//! Turns a fetched update document into [`UpdatableData`].
//!
//! Rejections are absorbed here: a section that fails validation is logged and
//! treated as invalid, and only the overall success flag reflects it.

pub mod limits;
pub mod reader;

pub use limits::ReaderLimits;
pub use reader::{ReaderError, Section, UpdatableDataReader};

use crate::model::update::{UpdatableData, UpdateResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionStatus {
    NotFound,
    FoundValid,
    FoundInvalid,
}

/// Builds the update outcome for one fetch attempt.
///
/// Only a `Success` fetch can yield sections. A zero-length body is a
/// legitimate "nothing to change" answer, while anything else that does not
/// parse as a JSON object (whitespace included) yields nothing usable.
pub fn build_updatable_data(
    body: &str,
    attempted_update_time: DateTime<Utc>,
    initial_update_result: UpdateResult,
    buyer: &str,
    limits: &ReaderLimits,
) -> UpdatableData {
    if !initial_update_result.is_success() {
        return UpdatableData::unsuccessful(attempted_update_time, initial_update_result);
    }

    if body.is_empty() {
        tracing::debug!(buyer, "update response was empty");
        return UpdatableData::successful(attempted_update_time, None, None, None);
    }

    let response_id = response_id(body);
    let document = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(document)) => document,
        Ok(_) => {
            tracing::warn!(response = %response_id, buyer, "update response is not a JSON object");
            return UpdatableData::unsuccessful(attempted_update_time, UpdateResult::Success);
        }
        Err(err) => {
            tracing::warn!(
                response = %response_id,
                buyer,
                error = %err,
                "update response is not valid JSON"
            );
            return UpdatableData::unsuccessful(attempted_update_time, UpdateResult::Success);
        }
    };

    let reader = UpdatableDataReader::new(&document, &response_id, buyer, limits);
    let (signals_status, signals) = settle(&response_id, reader.user_bidding_signals());
    let (trusted_status, trusted) = settle(&response_id, reader.trusted_bidding_data());
    let (ads_status, ads) = settle(&response_id, reader.ads());

    let statuses = [signals_status, trusted_status, ads_status];
    let any_valid = statuses.contains(&SectionStatus::FoundValid);
    let none_declared = statuses.iter().all(|status| *status == SectionStatus::NotFound);

    if any_valid || none_declared {
        tracing::debug!(
            response = %response_id,
            buyer,
            signals = ?signals_status,
            trusted_bidding_data = ?trusted_status,
            ads = ?ads_status,
            "update response validated"
        );
        UpdatableData::successful(attempted_update_time, signals, trusted, ads)
    } else {
        tracing::warn!(
            response = %response_id,
            buyer,
            "every section in the update response was rejected"
        );
        UpdatableData::unsuccessful(attempted_update_time, UpdateResult::Success)
    }
}

fn settle<T>(
    response_id: &str,
    outcome: Result<Option<T>, ReaderError>,
) -> (SectionStatus, Option<T>) {
    match outcome {
        Ok(Some(value)) => (SectionStatus::FoundValid, Some(value)),
        Ok(None) => (SectionStatus::NotFound, None),
        Err(err) => {
            tracing::warn!(
                response = response_id,
                section = %err.section(),
                error = %err,
                "rejecting update section"
            );
            (SectionStatus::FoundInvalid, None)
        }
    }
}

/// Short stable identifier used to correlate log lines for one response.
fn response_id(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
