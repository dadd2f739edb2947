use crate::fetch::options::{
    HttpFetchOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_READ_TIMEOUT,
};
use crate::validation::limits::{ReaderLimits, DEFAULT_MAX_NUM_ADS, DEFAULT_SECTION_LIMIT_BYTES};
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_THREAD_POOL_SIZE: usize = 8;
const DEFAULT_MAX_NUM_UPDATED: usize = 1000;
const DEFAULT_JOB_MAX_RUNTIME: Duration = Duration::from_secs(10 * 60);
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_JOB_PERIOD: Duration = Duration::from_secs(4 * 60 * 60);

const ENV_PREFIX: &str = "AUDIENCE_REFRESH_";

/// Runtime configuration for the background fetch pipeline.
///
/// All instances must be constructed via [`FetchConfig::builder`] or [`FetchConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_bytes: usize,
    max_user_bidding_signals_bytes: usize,
    max_trusted_bidding_data_bytes: usize,
    max_ads_bytes: usize,
    max_num_ads: usize,
    thread_pool_size: usize,
    max_num_updated: usize,
    job_max_runtime: Duration,
    update_interval: Duration,
    job_period: Duration,
    background_fetch_enabled: bool,
    ad_filtering_enabled: bool,
    app_install_filtering_enabled: bool,
    enrollment_check_enabled: bool,
}

pub struct FetchConfigParams {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
    pub max_user_bidding_signals_bytes: usize,
    pub max_trusted_bidding_data_bytes: usize,
    pub max_ads_bytes: usize,
    pub max_num_ads: usize,
    pub thread_pool_size: usize,
    pub max_num_updated: usize,
    pub job_max_runtime: Duration,
    pub update_interval: Duration,
    pub job_period: Duration,
    pub background_fetch_enabled: bool,
    pub ad_filtering_enabled: bool,
    pub app_install_filtering_enabled: bool,
    pub enrollment_check_enabled: bool,
}

impl FetchConfig {
    /// Returns a builder seeded with defaults for every value.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }

    /// Builds a configuration from defaults overridden by `AUDIENCE_REFRESH_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        FetchConfigBuilder::from_env()?.build()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: FetchConfigParams) -> Result<Self> {
        let FetchConfigParams {
            connect_timeout,
            read_timeout,
            max_response_bytes,
            max_user_bidding_signals_bytes,
            max_trusted_bidding_data_bytes,
            max_ads_bytes,
            max_num_ads,
            thread_pool_size,
            max_num_updated,
            job_max_runtime,
            update_interval,
            job_period,
            background_fetch_enabled,
            ad_filtering_enabled,
            app_install_filtering_enabled,
            enrollment_check_enabled,
        } = params;

        let config = Self {
            connect_timeout,
            read_timeout,
            max_response_bytes,
            max_user_bidding_signals_bytes,
            max_trusted_bidding_data_bytes,
            max_ads_bytes,
            max_num_ads,
            thread_pool_size,
            max_num_updated,
            job_max_runtime,
            update_interval,
            job_period,
            background_fetch_enabled,
            ad_filtering_enabled,
            app_install_filtering_enabled,
            enrollment_check_enabled,
        };

        config.validate()?;
        Ok(config)
    }

    /// Maximum time allowed to establish a connection to an update endpoint.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Maximum wait for response headers and for each body chunk.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    pub fn max_user_bidding_signals_bytes(&self) -> usize {
        self.max_user_bidding_signals_bytes
    }

    pub fn max_trusted_bidding_data_bytes(&self) -> usize {
        self.max_trusted_bidding_data_bytes
    }

    pub fn max_ads_bytes(&self) -> usize {
        self.max_ads_bytes
    }

    pub fn max_num_ads(&self) -> usize {
        self.max_num_ads
    }

    /// Number of audience updates allowed to run concurrently.
    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size
    }

    /// Upper bound on audiences refreshed by one run.
    pub fn max_num_updated(&self) -> usize {
        self.max_num_updated
    }

    /// Deadline for the fan-out phase of a run.
    pub fn job_max_runtime(&self) -> Duration {
        self.job_max_runtime
    }

    /// Delay added to the job start time to compute the next eligible update.
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Interval between periodic job invocations.
    pub fn job_period(&self) -> Duration {
        self.job_period
    }

    pub fn background_fetch_enabled(&self) -> bool {
        self.background_fetch_enabled
    }

    pub fn ad_filtering_enabled(&self) -> bool {
        self.ad_filtering_enabled
    }

    /// Gates the app-install housekeeping step.
    pub fn app_install_filtering_enabled(&self) -> bool {
        self.app_install_filtering_enabled
    }

    /// Disabling enrollment checks skips the disallowed-buyer sweep.
    pub fn enrollment_check_enabled(&self) -> bool {
        self.enrollment_check_enabled
    }

    pub fn reader_limits(&self) -> ReaderLimits {
        ReaderLimits {
            max_user_bidding_signals_bytes: self.max_user_bidding_signals_bytes,
            max_trusted_bidding_data_bytes: self.max_trusted_bidding_data_bytes,
            max_ads_bytes: self.max_ads_bytes,
            max_num_ads: self.max_num_ads,
            filtering_enabled: self.ad_filtering_enabled,
        }
    }

    pub fn http_options(&self) -> HttpFetchOptions {
        HttpFetchOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            max_response_bytes: self.max_response_bytes,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        self.http_options().validate()?;
        self.reader_limits().validate()?;

        if self.thread_pool_size == 0 {
            bail!("thread_pool_size must be greater than 0");
        }

        if self.max_num_updated == 0 {
            bail!("max_num_updated must be greater than 0");
        }

        if self.job_max_runtime.is_zero() {
            bail!("job_max_runtime must be greater than 0");
        }

        if self.update_interval.is_zero() {
            bail!("update_interval must be greater than 0");
        }

        if self.job_period.is_zero() {
            bail!("job_period must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FetchConfigBuilder {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    max_response_bytes: Option<usize>,
    max_user_bidding_signals_bytes: Option<usize>,
    max_trusted_bidding_data_bytes: Option<usize>,
    max_ads_bytes: Option<usize>,
    max_num_ads: Option<usize>,
    thread_pool_size: Option<usize>,
    max_num_updated: Option<usize>,
    job_max_runtime: Option<Duration>,
    update_interval: Option<Duration>,
    job_period: Option<Duration>,
    background_fetch_enabled: Option<bool>,
    ad_filtering_enabled: Option<bool>,
    app_install_filtering_enabled: Option<bool>,
    enrollment_check_enabled: Option<bool>,
}

impl FetchConfigBuilder {
    /// Seeds a builder from `AUDIENCE_REFRESH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Seeds a builder from any variable lookup. Durations are read in
    /// milliseconds from `*_MS` variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| -> Result<Option<Duration>> {
            Ok(parse_var::<u64, _>(&lookup, name)?.map(Duration::from_millis))
        };

        Ok(Self {
            connect_timeout: millis("CONNECT_TIMEOUT_MS")?,
            read_timeout: millis("READ_TIMEOUT_MS")?,
            max_response_bytes: parse_var(&lookup, "MAX_RESPONSE_BYTES")?,
            max_user_bidding_signals_bytes: parse_var(&lookup, "MAX_USER_BIDDING_SIGNALS_BYTES")?,
            max_trusted_bidding_data_bytes: parse_var(&lookup, "MAX_TRUSTED_BIDDING_DATA_BYTES")?,
            max_ads_bytes: parse_var(&lookup, "MAX_ADS_BYTES")?,
            max_num_ads: parse_var(&lookup, "MAX_NUM_ADS")?,
            thread_pool_size: parse_var(&lookup, "THREAD_POOL_SIZE")?,
            max_num_updated: parse_var(&lookup, "MAX_NUM_UPDATED")?,
            job_max_runtime: millis("JOB_MAX_RUNTIME_MS")?,
            update_interval: millis("UPDATE_INTERVAL_MS")?,
            job_period: millis("JOB_PERIOD_MS")?,
            background_fetch_enabled: parse_flag(&lookup, "ENABLED")?,
            ad_filtering_enabled: parse_flag(&lookup, "AD_FILTERING_ENABLED")?,
            app_install_filtering_enabled: parse_flag(&lookup, "APP_INSTALL_FILTERING_ENABLED")?,
            enrollment_check_enabled: parse_flag(&lookup, "ENROLLMENT_CHECK_ENABLED")?,
        })
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = Some(bytes);
        self
    }

    pub fn max_user_bidding_signals_bytes(mut self, bytes: usize) -> Self {
        self.max_user_bidding_signals_bytes = Some(bytes);
        self
    }

    pub fn max_trusted_bidding_data_bytes(mut self, bytes: usize) -> Self {
        self.max_trusted_bidding_data_bytes = Some(bytes);
        self
    }

    pub fn max_ads_bytes(mut self, bytes: usize) -> Self {
        self.max_ads_bytes = Some(bytes);
        self
    }

    pub fn max_num_ads(mut self, count: usize) -> Self {
        self.max_num_ads = Some(count);
        self
    }

    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = Some(size);
        self
    }

    pub fn max_num_updated(mut self, count: usize) -> Self {
        self.max_num_updated = Some(count);
        self
    }

    pub fn job_max_runtime(mut self, runtime: Duration) -> Self {
        self.job_max_runtime = Some(runtime);
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    pub fn job_period(mut self, period: Duration) -> Self {
        self.job_period = Some(period);
        self
    }

    pub fn background_fetch_enabled(mut self, enabled: bool) -> Self {
        self.background_fetch_enabled = Some(enabled);
        self
    }

    pub fn ad_filtering_enabled(mut self, enabled: bool) -> Self {
        self.ad_filtering_enabled = Some(enabled);
        self
    }

    pub fn app_install_filtering_enabled(mut self, enabled: bool) -> Self {
        self.app_install_filtering_enabled = Some(enabled);
        self
    }

    pub fn enrollment_check_enabled(mut self, enabled: bool) -> Self {
        self.enrollment_check_enabled = Some(enabled);
        self
    }

    pub fn build(self) -> Result<FetchConfig> {
        let params = FetchConfigParams {
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
            max_response_bytes: self
                .max_response_bytes
                .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES),
            max_user_bidding_signals_bytes: self
                .max_user_bidding_signals_bytes
                .unwrap_or(DEFAULT_SECTION_LIMIT_BYTES),
            max_trusted_bidding_data_bytes: self
                .max_trusted_bidding_data_bytes
                .unwrap_or(DEFAULT_SECTION_LIMIT_BYTES),
            max_ads_bytes: self.max_ads_bytes.unwrap_or(DEFAULT_SECTION_LIMIT_BYTES),
            max_num_ads: self.max_num_ads.unwrap_or(DEFAULT_MAX_NUM_ADS),
            thread_pool_size: self.thread_pool_size.unwrap_or(DEFAULT_THREAD_POOL_SIZE),
            max_num_updated: self.max_num_updated.unwrap_or(DEFAULT_MAX_NUM_UPDATED),
            job_max_runtime: self.job_max_runtime.unwrap_or(DEFAULT_JOB_MAX_RUNTIME),
            update_interval: self.update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL),
            job_period: self.job_period.unwrap_or(DEFAULT_JOB_PERIOD),
            background_fetch_enabled: self.background_fetch_enabled.unwrap_or(true),
            ad_filtering_enabled: self.ad_filtering_enabled.unwrap_or(false),
            app_install_filtering_enabled: self.app_install_filtering_enabled.unwrap_or(true),
            enrollment_check_enabled: self.enrollment_check_enabled.unwrap_or(true),
        };

        FetchConfig::new(params)
    }
}

fn parse_var<T, F>(lookup: &F, suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{ENV_PREFIX}{suffix}");
    match lookup(&name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value {raw:?}")),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, suffix: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{ENV_PREFIX}{suffix}");
    let Some(raw) = lookup(&name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => bail!("{name} must be a boolean, got {raw:?}"),
    }
}
