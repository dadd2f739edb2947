use anyhow::{bail, Result};

pub const DEFAULT_SECTION_LIMIT_BYTES: usize = 10 * 1024;
pub const DEFAULT_MAX_NUM_ADS: usize = 100;

/// Per-section bounds applied while reading an update document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderLimits {
    pub max_user_bidding_signals_bytes: usize,
    pub max_trusted_bidding_data_bytes: usize,
    pub max_ads_bytes: usize,
    pub max_num_ads: usize,
    /// Keeps `ad_counter_keys` and `ad_filters` on parsed ads when set.
    pub filtering_enabled: bool,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            max_user_bidding_signals_bytes: DEFAULT_SECTION_LIMIT_BYTES,
            max_trusted_bidding_data_bytes: DEFAULT_SECTION_LIMIT_BYTES,
            max_ads_bytes: DEFAULT_SECTION_LIMIT_BYTES,
            max_num_ads: DEFAULT_MAX_NUM_ADS,
            filtering_enabled: false,
        }
    }
}

impl ReaderLimits {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_user_bidding_signals_bytes == 0 {
            bail!("max_user_bidding_signals_bytes must be greater than 0");
        }
        if self.max_trusted_bidding_data_bytes == 0 {
            bail!("max_trusted_bidding_data_bytes must be greater than 0");
        }
        if self.max_ads_bytes == 0 {
            bail!("max_ads_bytes must be greater than 0");
        }
        if self.max_num_ads == 0 {
            bail!("max_num_ads must be greater than 0");
        }
        Ok(())
    }
}
