use crate::model::audience::{AudienceKey, CustomAudienceRecord};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Per-audience refresh metadata.
///
/// `eligible_update_time` only moves forward, and only on a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBookkeepingRecord {
    pub key: AudienceKey,
    pub daily_update_uri: String,
    pub eligible_update_time: DateTime<Utc>,
    pub num_validation_failures: u32,
}

impl FetchBookkeepingRecord {
    /// Initial row written when an audience is joined or overwritten.
    ///
    /// Audiences still missing updatable sections are eligible right away.
    pub fn for_join(record: &CustomAudienceRecord, update_interval: Duration) -> Self {
        let eligible_update_time = if record.is_missing_updatable_data() {
            DateTime::<Utc>::UNIX_EPOCH
        } else {
            advance(record.creation_time, update_interval)
        };

        Self {
            key: record.key.clone(),
            daily_update_uri: record.daily_update_uri.clone(),
            eligible_update_time,
            num_validation_failures: 0,
        }
    }

    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.eligible_update_time <= now
    }

    pub fn after_success(&self, job_start: DateTime<Utc>, update_interval: Duration) -> Self {
        let next = advance(job_start, update_interval).max(self.eligible_update_time);
        Self {
            key: self.key.clone(),
            daily_update_uri: self.daily_update_uri.clone(),
            eligible_update_time: next,
            num_validation_failures: 0,
        }
    }

    pub fn after_failure(&self) -> Self {
        Self {
            key: self.key.clone(),
            daily_update_uri: self.daily_update_uri.clone(),
            eligible_update_time: self.eligible_update_time,
            num_validation_failures: self.num_validation_failures.saturating_add(1),
        }
    }
}

pub(crate) fn advance(start: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
