//! Auxiliary asset fetches with a per-attempt timeout and bounded retry.
//!
//! ### Retry policy
//! - Each attempt is abandoned after `timeout` (default 30s).
//! - At most `max_attempts` attempts (default 3).
//! - Delay before attempt `n + 1` is `backoff_base * 2^(n - 1)` (500ms, 1s, ...).
//! - Failures that cannot succeed on retry are returned immediately: invalid
//!   URLs, request construction errors, and 4xx responses other than 408/429.

pub mod url;

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};

use panorama_core::Error;
use panorama_core::cache::hash::hash_bytes;

pub use self::url::{UrlError, parse_asset_url};

/// Configuration for [`AssetFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "panorama/0.1")
    pub user_agent: String,

    /// Per-attempt timeout (default: 30s)
    pub timeout: Duration,

    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per retry (default: 500ms)
    pub backoff_base: Duration,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "panorama/0.1".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl FetchConfig {
    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Failure of a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("{len} bytes exceeds {max}")]
    TooLarge { len: usize, max: usize },
}

impl AssetError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AssetError::InvalidUrl(_) | AssetError::Request(_) | AssetError::TooLarge { .. } => false,
            AssetError::Status(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
            AssetError::Timeout(_) | AssetError::Network(_) => true,
        }
    }
}

impl From<AssetError> for Error {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::InvalidUrl(e) => Error::InvalidInput(format!("invalid asset URL: {e}")),
            AssetError::Timeout(_) => Error::FetchTimeout(err.to_string()),
            other => Error::HttpError(other.to_string()),
        }
    }
}

/// A successfully fetched asset.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub url: ::url::Url,
    pub final_url: ::url::Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    /// SHA-256 hex of the body
    pub sha256: String,
    pub attempts: u32,
    pub fetch_ms: u64,
}

/// HTTP client for images and other auxiliary assets.
pub struct AssetFetcher {
    http: Client,
    config: FetchConfig,
}

impl AssetFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url_str`, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, url_str: &str) -> Result<FetchedAsset, Error> {
        let start = Instant::now();
        let url = parse_asset_url(url_str).map_err(AssetError::from)?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(&url).await {
                Ok((final_url, status, content_type, bytes)) => {
                    let fetch_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(%url, %final_url, attempt, fetch_ms, bytes = bytes.len(), "fetched asset");
                    return Ok(FetchedAsset {
                        url,
                        final_url,
                        status,
                        content_type,
                        sha256: hash_bytes(&bytes),
                        bytes,
                        attempts: attempt,
                        fetch_ms,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(%url, attempt, error = %e, ?delay, "asset fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "asset fetch failed");
                    return Err(e.into());
                }
            }
        }
    }

    async fn attempt(
        &self, url: &::url::Url,
    ) -> Result<(::url::Url, StatusCode, Option<String>, Bytes), AssetError> {
        let timeout = self.config.timeout;
        let request = self.http.get(url.as_str()).build().map_err(|e| AssetError::Request(e.to_string()))?;

        let exchange = async {
            let response = self.http.execute(request).await.map_err(|e| network_error(e, timeout))?;
            let status = response.status();
            if !status.is_success() {
                return Err(AssetError::Status(status.as_u16()));
            }

            let max = self.config.max_bytes;
            if let Some(len) = response.content_length().and_then(|l| usize::try_from(l).ok())
                && len > max
            {
                return Err(AssetError::TooLarge { len, max });
            }

            let final_url = response.url().clone();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await.map_err(|e| network_error(e, timeout))?;
            if bytes.len() > max {
                return Err(AssetError::TooLarge { len: bytes.len(), max });
            }
            Ok((final_url, status, content_type, bytes))
        };

        tokio::time::timeout(timeout, exchange).await.map_err(|_| AssetError::Timeout(timeout))?
    }
}

fn network_error(err: reqwest::Error, timeout: Duration) -> AssetError {
    if err.is_timeout() {
        AssetError::Timeout(timeout)
    } else if err.is_builder() {
        AssetError::Request(err.to_string())
    } else {
        AssetError::Network(err.to_string())
    }
}
