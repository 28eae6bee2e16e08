use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::debug;

use super::{check_url, status_error, FetchError, PageFetcher};

/// Plain GET with browser-like headers. Cheapest tier; first to get blocked.
pub struct DirectFetcher {
    client: reqwest::Client,
}

impl DirectFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for DirectFetcher {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let parsed = check_url(url)?;
        let resp = self.client.get(parsed).timeout(timeout).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "Direct response");

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }
}
