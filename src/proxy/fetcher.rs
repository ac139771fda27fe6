//! Single-request page fetcher used by the source crawler

use crate::error::FetchError;
use crate::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Default timeout for listing page requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default user agent for HTTP requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

/// Anything that can turn a page URL (and optional POST body) into a body.
///
/// Implementations never fail: a transport problem yields an empty string.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch(&self, url: &str, body: Option<&str>) -> String;
}

/// Configuration for the page fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// reqwest-backed page fetcher
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    ///
    /// Listing pages are always fetched directly, ignoring `HTTP_PROXY` and
    /// friends from the environment.
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Issue one request: POST when a body is given, GET otherwise
    pub async fn try_fetch(
        &self,
        url: &str,
        body: Option<&str>,
    ) -> std::result::Result<String, FetchError> {
        let request = match body {
            Some(body) => {
                let content_type = if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                    "application/json"
                } else {
                    "application/x-www-form-urlencoded"
                };
                self.client
                    .post(url)
                    .header(CONTENT_TYPE, content_type)
                    .body(body.to_string())
            }
            None => self.client.get(url),
        };

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[async_trait]
impl PageFetch for Fetcher {
    async fn fetch(&self, url: &str, body: Option<&str>) -> String {
        match self.try_fetch(url, body).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{}", e);
                String::new()
            }
        }
    }
}
