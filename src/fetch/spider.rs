use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use spider_client::shapes::request::{RequestType, ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::debug;

use super::{check_url, status_error, FetchError, PageFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiderMode {
    Http,
    Chrome,
}

/// spider.cloud scrape, returning raw HTML.
pub struct SpiderFetcher {
    spider: Spider,
    mode: SpiderMode,
}

impl SpiderFetcher {
    pub fn new(api_key: &str, mode: SpiderMode) -> Result<Self> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider, mode })
    }

    fn params(&self) -> RequestParams {
        RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            request: Some(match self.mode {
                SpiderMode::Http => RequestType::Http,
                SpiderMode::Chrome => RequestType::Chrome,
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PageFetcher for SpiderFetcher {
    fn name(&self) -> &str {
        match self.mode {
            SpiderMode::Http => "spider",
            SpiderMode::Chrome => "spider_chrome",
        }
    }

    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        check_url(url)?;
        let response = self
            .spider
            .scrape_url(url, Some(self.params()), "application/json")
            .await
            .map_err(|e| FetchError::Transport(format!("spider: {e}")))?;

        let (content, status) = parse_response(response);
        debug!(url, ?status, bytes = content.as_deref().map(str::len), "Spider response");

        if let Some(status) = status.filter(|s| !(200..300).contains(s)) {
            return Err(status_error(status as u16, content.as_deref().unwrap_or("")));
        }
        match content {
            Some(c) if !c.trim().is_empty() => Ok(c),
            _ => Err(FetchError::Empty),
        }
    }
}

/// Pull `content` and `status` from the first element of a spider response.
/// The API sometimes hands back the JSON array as a string.
fn parse_response(value: serde_json::Value) -> (Option<String>, Option<i64>) {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };

    let first = parsed.as_array().and_then(|arr| arr.first());
    let content = first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string);
    let status = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_i64());
    (content, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_array_response() {
        let v = json!([{ "content": "<html>ok</html>", "status": 200 }]);
        assert_eq!(parse_response(v), (Some("<html>ok</html>".into()), Some(200)));
    }

    #[test]
    fn parses_stringified_response() {
        let v = json!(r#"[{"content":"<p>x</p>","status":403}]"#);
        assert_eq!(parse_response(v), (Some("<p>x</p>".into()), Some(403)));
    }

    #[test]
    fn missing_fields_are_none() {
        assert_eq!(parse_response(json!({})), (None, None));
    }
}
