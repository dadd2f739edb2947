//! Timeouts and size bounds for a single update download.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpFetchOptions {
    pub connect_timeout: Duration,
    /// Bounds the wait for response headers and for every body chunk.
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for HttpFetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl HttpFetchOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }
        if self.read_timeout.is_zero() {
            bail!("read_timeout must be greater than 0");
        }
        if self.max_response_bytes == 0 {
            bail!("max_response_bytes must be greater than 0");
        }
        Ok(())
    }
}
