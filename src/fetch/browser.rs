use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{check_url, status_error, FetchError, PageFetcher};

/// Fully-rendered HTML via a Browserless `/content` endpoint.
pub struct BrowserlessFetcher {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl BrowserlessFetcher {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let endpoint = content_endpoint(base_url, token)?;
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        info!(base_url, "BrowserlessFetcher initialized");
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    fn name(&self) -> &str {
        "browserless"
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        check_url(url)?;
        let body = serde_json::json!({ "url": url });

        let resp = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let html = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &html));
        }
        if html.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        debug!(url, bytes = html.len(), "Browserless response");
        Ok(html)
    }
}

/// `<base>/content`, with the token as a query parameter.
fn content_endpoint(base_url: &str, token: Option<&str>) -> Result<url::Url> {
    let mut endpoint = url::Url::parse(base_url)
        .with_context(|| format!("invalid browserless.base_url: {base_url}"))?;
    endpoint
        .path_segments_mut()
        .map_err(|_| anyhow::anyhow!("browserless.base_url cannot be a base: {base_url}"))?
        .pop_if_empty()
        .push("content");
    if let Some(token) = token {
        endpoint.query_pairs_mut().append_pair("token", token);
    }
    Ok(endpoint)
}

/// Local headless Chromium, `--dump-dom`. Each instance is heavy, so a
/// semaphore caps how many run at once across all pipelines.
pub struct ChromeFetcher {
    binary: String,
    user_agent: String,
    pool: Semaphore,
}

impl ChromeFetcher {
    pub fn new(binary: &str, user_agent: &str, max_concurrent: usize) -> Self {
        info!(binary, max_concurrent, "ChromeFetcher initialized");
        Self {
            binary: binary.to_string(),
            user_agent: user_agent.to_string(),
            pool: Semaphore::new(max_concurrent),
        }
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let parsed = check_url(url)?;
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("chrome pool closed".into()))?;

        // Dropped on every exit path, taking the profile directory with it.
        let profile = tempfile::tempdir()
            .map_err(|e| FetchError::Transport(format!("temp profile dir: {e}")))?;

        let child = tokio::process::Command::new(&self.binary)
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                &format!("--user-agent={}", self.user_agent),
                &format!("--user-data-dir={}", profile.path().display()),
                "--dump-dom",
                parsed.as_str(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::Transport(format!("failed to launch {}: {e}", self.binary)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
            .map_err(|e| FetchError::Transport(format!("chrome: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, stderr = %stderr, "Chrome exited with error");
            return Err(FetchError::Transport(format!("chrome exited with {}", output.status)));
        }
        if output.stdout.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
