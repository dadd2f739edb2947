//! Section-level readers for a parsed update document. Each reader either
//! yields a typed section, reports that the document did not declare it, or
//! explains why the declared section was rejected.

use crate::model::audience::{AdData, TrustedBiddingData};
use crate::validation::limits::ReaderLimits;
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

pub const USER_BIDDING_SIGNALS_KEY: &str = "user_bidding_signals";
pub const TRUSTED_BIDDING_DATA_KEY: &str = "trusted_bidding_data";
pub const ADS_KEY: &str = "ads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    UserBiddingSignals,
    TrustedBiddingData,
    Ads,
}

impl Section {
    pub fn key(self) -> &'static str {
        match self {
            Section::UserBiddingSignals => USER_BIDDING_SIGNALS_KEY,
            Section::TrustedBiddingData => TRUSTED_BIDDING_DATA_KEY,
            Section::Ads => ADS_KEY,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    Malformed { section: Section, reason: String },
    TooLarge { section: Section, size: usize, limit: usize },
    TooManyAds { count: usize, limit: usize },
    BuyerMismatch { section: Section, uri: String },
}

impl ReaderError {
    pub fn section(&self) -> Section {
        match self {
            ReaderError::Malformed { section, .. }
            | ReaderError::TooLarge { section, .. }
            | ReaderError::BuyerMismatch { section, .. } => *section,
            ReaderError::TooManyAds { .. } => Section::Ads,
        }
    }
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Malformed { section, reason } => {
                write!(f, "{section} is malformed: {reason}")
            }
            ReaderError::TooLarge {
                section,
                size,
                limit,
            } => write!(f, "{section} is {size} bytes, above the {limit} byte limit"),
            ReaderError::TooManyAds { count, limit } => {
                write!(f, "{count} ads declared, above the limit of {limit}")
            }
            ReaderError::BuyerMismatch { section, uri } => {
                write!(f, "{section} uri {uri} does not belong to the buyer")
            }
        }
    }
}

impl std::error::Error for ReaderError {}

/// Reads the recognized sections out of one update document.
pub struct UpdatableDataReader<'a> {
    document: &'a Map<String, Value>,
    response_id: &'a str,
    buyer: &'a str,
    limits: &'a ReaderLimits,
}

impl<'a> UpdatableDataReader<'a> {
    pub fn new(
        document: &'a Map<String, Value>,
        response_id: &'a str,
        buyer: &'a str,
        limits: &'a ReaderLimits,
    ) -> Self {
        Self {
            document,
            response_id,
            buyer,
            limits,
        }
    }

    pub fn user_bidding_signals(&self) -> Result<Option<Value>, ReaderError> {
        let section = Section::UserBiddingSignals;
        let Some(raw) = self.document.get(section.key()) else {
            return Ok(None);
        };

        if !raw.is_object() {
            return Err(malformed(section, "expected a JSON object"));
        }
        ensure_size(
            section,
            serialized_len(raw),
            self.limits.max_user_bidding_signals_bytes,
        )?;

        Ok(Some(raw.clone()))
    }

    pub fn trusted_bidding_data(&self) -> Result<Option<TrustedBiddingData>, ReaderError> {
        let section = Section::TrustedBiddingData;
        let Some(raw) = self.document.get(section.key()) else {
            return Ok(None);
        };

        let data: TrustedBiddingData = serde_json::from_value(raw.clone())
            .map_err(|err| malformed(section, err.to_string()))?;
        ensure_size(
            section,
            serialized_len(raw),
            self.limits.max_trusted_bidding_data_bytes,
        )?;
        if !uri_belongs_to_buyer(&data.uri, self.buyer) {
            return Err(ReaderError::BuyerMismatch {
                section,
                uri: data.uri,
            });
        }

        Ok(Some(data))
    }

    /// Invalid individual ads are dropped; the list may end up empty and is
    /// still a valid section.
    pub fn ads(&self) -> Result<Option<Vec<AdData>>, ReaderError> {
        let section = Section::Ads;
        let Some(raw) = self.document.get(section.key()) else {
            return Ok(None);
        };

        let elements = raw
            .as_array()
            .ok_or_else(|| malformed(section, "expected a JSON array"))?;
        if elements.len() > self.limits.max_num_ads {
            return Err(ReaderError::TooManyAds {
                count: elements.len(),
                limit: self.limits.max_num_ads,
            });
        }

        let mut ads = Vec::with_capacity(elements.len());
        let mut total_bytes = 0usize;
        for (index, element) in elements.iter().enumerate() {
            let Some(ad) = self.read_ad(index, element) else {
                continue;
            };
            total_bytes = total_bytes.saturating_add(ad_len(&ad));
            ads.push(ad);
        }
        ensure_size(section, total_bytes, self.limits.max_ads_bytes)?;

        Ok(Some(ads))
    }

    fn read_ad(&self, index: usize, element: &Value) -> Option<AdData> {
        let ad: AdData = match serde_json::from_value(element.clone()) {
            Ok(ad) => ad,
            Err(err) => {
                tracing::debug!(
                    response = self.response_id,
                    index,
                    error = %err,
                    "dropping malformed ad"
                );
                return None;
            }
        };

        if !uri_belongs_to_buyer(&ad.render_uri, self.buyer) {
            tracing::debug!(
                response = self.response_id,
                index,
                render_uri = %ad.render_uri,
                "dropping ad rendered outside the buyer domain"
            );
            return None;
        }

        if self.limits.filtering_enabled {
            Some(ad)
        } else {
            Some(ad.without_filtering_fields())
        }
    }
}

/// Https URIs whose host is the buyer itself.
pub(crate) fn uri_belongs_to_buyer(uri: &str, buyer: &str) -> bool {
    match Url::parse(uri) {
        Ok(parsed) => {
            parsed.scheme() == "https"
                && parsed
                    .host_str()
                    .is_some_and(|host| host.eq_ignore_ascii_case(buyer))
        }
        Err(_) => false,
    }
}

fn malformed(section: Section, reason: impl Into<String>) -> ReaderError {
    ReaderError::Malformed {
        section,
        reason: reason.into(),
    }
}

fn ensure_size(section: Section, size: usize, limit: usize) -> Result<(), ReaderError> {
    if size > limit {
        return Err(ReaderError::TooLarge {
            section,
            size,
            limit,
        });
    }
    Ok(())
}

fn serialized_len(value: &Value) -> usize {
    value.to_string().len()
}

fn ad_len(ad: &AdData) -> usize {
    serde_json::to_string(ad).map_or(0, |encoded| encoded.len())
}
