//! HTTP download of daily update documents with per-attempt timeouts and a
//! hard cap on the response size.

use crate::fetch::options::HttpFetchOptions;
use crate::model::update::UpdateResult;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::USER_AGENT;
use reqwest::Response;
use std::fmt;
use tokio::time::timeout;
use url::Url;

#[derive(Debug)]
pub enum FetchError {
    InvalidUri { uri: String, reason: String },
    Timeout { phase: &'static str },
    ResponseTooLarge { limit: usize },
    Status { status: u16 },
    /// The body arrived in full but is not UTF-8 text.
    UnreadableBody { reason: String },
    Transport(reqwest::Error),
}

impl FetchError {
    /// Malformed targets are never sent. An unreadable body was delivered
    /// successfully and is rejected the same way as a document that does not
    /// parse; everything else is a network failure.
    pub fn update_result(&self) -> UpdateResult {
        match self {
            FetchError::InvalidUri { .. } => UpdateResult::Unknown,
            FetchError::UnreadableBody { .. } => UpdateResult::Success,
            _ => UpdateResult::NetworkFailure,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUri { uri, reason } => {
                write!(f, "invalid update uri {uri}: {reason}")
            }
            FetchError::Timeout { phase } => write!(f, "update fetch timed out while {phase}"),
            FetchError::ResponseTooLarge { limit } => {
                write!(f, "update response exceeded {limit} bytes")
            }
            FetchError::Status { status } => write!(f, "update endpoint returned HTTP {status}"),
            FetchError::UnreadableBody { reason } => {
                write!(f, "update response is not valid text: {reason}")
            }
            FetchError::Transport(err) => write!(f, "update transport error: {err}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Source of raw update documents, keyed by the audience's daily update URI.
pub trait UpdateSource: Send + Sync {
    fn fetch_update<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// Parses a daily update URI, accepting only absolute http(s) URIs with a host.
pub fn parse_update_uri(uri: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    let parsed = Url::parse(uri).map_err(|err| invalid(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed)
}

#[derive(Debug, Clone)]
pub struct HttpUpdateClient {
    client: reqwest::Client,
    options: HttpFetchOptions,
}

impl UpdateSource for HttpUpdateClient {
    fn fetch_update<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(self.get(uri))
    }
}

impl HttpUpdateClient {
    pub fn new(options: HttpFetchOptions) -> Result<Self> {
        options.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .context("failed to build update HTTP client")?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &HttpFetchOptions {
        &self.options
    }

    pub async fn get(&self, uri: &Url) -> Result<String, FetchError> {
        let request = self
            .client
            .get(uri.clone())
            .header(
                USER_AGENT,
                concat!("audience-refresh/", env!("CARGO_PKG_VERSION")),
            )
            .send();

        // Connection setup is bounded by reqwest itself; the read timeout
        // covers the whole wait for response headers.
        let response = timeout(self.options.read_timeout, request)
            .await
            .map_err(|_| FetchError::Timeout {
                phase: "awaiting response headers",
            })?
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = self.read_body_with_limit(response).await?;
        String::from_utf8(body).map_err(|err| FetchError::UnreadableBody {
            reason: err.utf8_error().to_string(),
        })
    }

    async fn read_body_with_limit(&self, mut response: Response) -> Result<Vec<u8>, FetchError> {
        let limit = self.options.max_response_bytes;
        if response
            .content_length()
            .is_some_and(|declared| declared > limit as u64)
        {
            return Err(FetchError::ResponseTooLarge { limit });
        }

        let mut body = Vec::new();
        loop {
            let chunk = timeout(self.options.read_timeout, response.chunk())
                .await
                .map_err(|_| FetchError::Timeout {
                    phase: "reading the response body",
                })?
                .map_err(classify_transport_error)?;

            let Some(chunk) = chunk else {
                return Ok(body);
            };
            if body.len().saturating_add(chunk.len()) > limit {
                return Err(FetchError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            phase: "connecting",
        }
    } else {
        FetchError::Transport(err)
    }
}
