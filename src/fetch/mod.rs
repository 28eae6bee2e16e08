pub mod browser;
pub mod classifier;
pub mod direct;
pub mod orchestrator;
pub mod spider;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AppConfig;

pub use classifier::classify;
pub use orchestrator::FetchOrchestrator;

/// Statuses a listing site answers with when it has decided we are a bot.
const BLOCK_STATUSES: &[u16] = &[401, 403, 429, 503];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("blocked (status {status})")]
    Blocked { status: u16 },

    #[error("empty response")]
    Empty,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Transport(format!("request timed out: {err}"))
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to the matching fetch error.
pub(crate) fn status_error(status: u16, body: &str) -> FetchError {
    if BLOCK_STATUSES.contains(&status) {
        FetchError::Blocked { status }
    } else {
        let snippet: String = body.chars().take(120).collect();
        FetchError::Transport(format!("HTTP {status}: {snippet}"))
    }
}

/// One way of turning a URL into raw markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Plain HTTP GET with browser-like headers.
    Direct,
    /// spider.cloud, HTTP mode.
    Spider,
    /// spider.cloud, headless Chrome mode.
    SpiderChrome,
    /// Browserless `/content` endpoint.
    Browserless,
    /// Local headless Chromium via `--dump-dom`.
    Chrome,
}

/// Build the configured fallback chain, in order.
pub fn build_strategies(cfg: &AppConfig) -> Result<Vec<Arc<dyn PageFetcher>>> {
    let mut chain: Vec<Arc<dyn PageFetcher>> = Vec::new();
    for kind in cfg.strategies() {
        let fetcher: Arc<dyn PageFetcher> = match kind {
            StrategyKind::Direct => Arc::new(direct::DirectFetcher::new(&cfg.fetch.user_agent)?),
            StrategyKind::Spider | StrategyKind::SpiderChrome => {
                let key = cfg
                    .spider
                    .api_key
                    .as_deref()
                    .context("spider strategy configured but no SPIDER_API_KEY / spider.api_key")?;
                let mode = if kind == StrategyKind::Spider {
                    spider::SpiderMode::Http
                } else {
                    spider::SpiderMode::Chrome
                };
                Arc::new(spider::SpiderFetcher::new(key, mode)?)
            }
            StrategyKind::Browserless => {
                let base = cfg
                    .browserless
                    .base_url
                    .as_deref()
                    .context("browserless strategy configured but browserless.base_url is unset")?;
                Arc::new(browser::BrowserlessFetcher::new(
                    base,
                    cfg.browserless.token.as_deref(),
                )?)
            }
            StrategyKind::Chrome => Arc::new(browser::ChromeFetcher::new(
                cfg.chrome.binary.as_deref().unwrap_or("chromium"),
                &cfg.fetch.user_agent,
                cfg.chrome.max_concurrent,
            )),
        };
        chain.push(fetcher);
    }
    Ok(chain)
}

/// Reject anything that is not an absolute http(s) URL before spending a round trip on it.
pub(crate) fn check_url(url: &str) -> Result<url::Url, FetchError> {
    let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::InvalidUrl(format!(
            "only http/https URLs allowed, got: {}",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}
