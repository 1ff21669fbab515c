//! HTTP client for pages and assets

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::REFERER;
use thiserror::Error;
use tracing::debug;

use crate::config::CrawlerConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Source of remote documents and assets
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`, optionally sending a `Referer`
    async fn get(&self, url: &str, referer: Option<&str>) -> Result<Bytes>;
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: u64,
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("taskbox/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 50 * 1024 * 1024,
            accept_invalid_certs: false,
        }
    }
}

impl From<&CrawlerConfig> for HttpConfig {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout.as_duration(),
            request_timeout: config.request_timeout.as_duration(),
            user_agent: config.user_agent.clone(),
            max_body_bytes: config.max_asset_bytes.as_u64(),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }
}

/// reqwest-backed [`Fetcher`]; one attempt per call, no retries
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

fn map_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else {
        FetchError::Request(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn get(&self, url: &str, referer: Option<&str>) -> Result<Bytes> {
        debug!(url, "Fetching");

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await.map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let limit = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })?;
        if bytes.len() as u64 > limit {
            return Err(FetchError::TooLarge { limit });
        }

        debug!(url, size = bytes.len(), "Fetch completed");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 50 * 1024 * 1024);
        assert!(config.user_agent.starts_with("taskbox/"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let result = client.get("not a url", None).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
