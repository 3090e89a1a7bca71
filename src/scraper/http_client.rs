use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

/// Thin reqwest wrapper. One attempt per request; callers decide what a
/// failure means for their item.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }

    /// GET `url` as text, failing on transport errors, timeouts and non-2xx.
    pub async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, reqwest::Error> {
        debug!("GET {} (timeout {:?})", url, timeout);
        self.inner
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}
