use crate::model::update::UpdatableData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Identity shared by an audience and its bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudienceKey {
    pub owner: String,
    pub buyer: String,
    pub name: String,
}

impl AudienceKey {
    pub fn new(owner: impl Into<String>, buyer: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            buyer: buyer.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AudienceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.buyer, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedBiddingData {
    #[serde(rename = "trusted_bidding_uri")]
    pub uri: String,
    #[serde(rename = "trusted_bidding_keys")]
    pub keys: Vec<String>,
}

/// One renderable ad attached to an audience.
///
/// `ad_counter_keys` and `ad_filters` only matter when ad filtering is enabled;
/// the reader strips them otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdData {
    pub render_uri: String,
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ad_counter_keys: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_filters: Option<Value>,
}

impl AdData {
    pub fn new(render_uri: impl Into<String>, metadata: Value) -> Self {
        Self {
            render_uri: render_uri.into(),
            metadata,
            ad_counter_keys: BTreeSet::new(),
            ad_filters: None,
        }
    }

    pub(crate) fn without_filtering_fields(mut self) -> Self {
        self.ad_counter_keys.clear();
        self.ad_filters = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomAudienceRecord {
    pub key: AudienceKey,
    pub creation_time: DateTime<Utc>,
    pub activation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub last_ads_and_bidding_data_updated_time: DateTime<Utc>,
    pub daily_update_uri: String,
    pub bidding_logic_uri: String,
    pub user_bidding_signals: Option<Value>,
    pub trusted_bidding_data: Option<TrustedBiddingData>,
    pub ads: Option<Vec<AdData>>,
}

impl CustomAudienceRecord {
    /// Audiences are active from activation (inclusive) until expiration (exclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.activation_time <= now && now < self.expiration_time
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }

    /// True when any section a daily update could fill in is still missing.
    pub fn is_missing_updatable_data(&self) -> bool {
        self.user_bidding_signals.is_none()
            || self.trusted_bidding_data.is_none()
            || self.ads.as_ref().map_or(true, |ads| ads.is_empty())
    }

    /// Returns a copy carrying the sections present in `update`; absent
    /// sections keep their stored value.
    pub fn copy_with_updatable_data(&self, update: &UpdatableData) -> Self {
        let mut updated = self.clone();
        updated.last_ads_and_bidding_data_updated_time = update.attempted_update_time();

        if let Some(signals) = update.user_bidding_signals() {
            updated.user_bidding_signals = Some(signals.clone());
        }
        if let Some(trusted) = update.trusted_bidding_data() {
            updated.trusted_bidding_data = Some(trusted.clone());
        }
        if let Some(ads) = update.ads() {
            updated.ads = Some(ads.to_vec());
        }

        updated
    }
}
