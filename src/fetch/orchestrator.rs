use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use super::classifier::{self, Classification};
use super::{FetchError, PageFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Ok,
    Blocked,
    Empty,
    Error(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Ok => f.write_str("ok"),
            AttemptOutcome::Blocked => f.write_str("blocked"),
            AttemptOutcome::Empty => f.write_str("empty"),
            AttemptOutcome::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// One strategy's try at a URL. Lives only for one orchestration call.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub rank: usize,
    pub strategy: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

pub struct Fetched {
    pub content: String,
    pub strategy: String,
    pub attempts: Vec<FetchAttempt>,
}

#[derive(Debug, Error)]
#[error("all {} strategies failed for {url} (last: {last})", attempts.len())]
pub struct FetchFailure {
    pub url: String,
    pub attempts: Vec<FetchAttempt>,
    pub last: AttemptOutcome,
}

/// Walks the fallback chain until one strategy returns usable content.
pub struct FetchOrchestrator {
    strategies: Vec<Arc<dyn PageFetcher>>,
    timeout: Duration,
    min_content_len: usize,
}

impl FetchOrchestrator {
    pub fn new(
        strategies: Vec<Arc<dyn PageFetcher>>,
        timeout: Duration,
        min_content_len: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!strategies.is_empty(), "fetch strategy list must not be empty");
        Ok(Self {
            strategies,
            timeout,
            min_content_len,
        })
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy once, in order. No strategy is retried.
    ///
    /// A timed-out strategy's future is dropped before the next one starts, so
    /// whatever it held (connection, browser process, temp profile) is released.
    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchFailure> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for (rank, strategy) in self.strategies.iter().enumerate() {
            let start = Instant::now();
            let result = tokio::time::timeout(self.timeout, strategy.fetch(url, self.timeout))
                .await
                .unwrap_or(Err(FetchError::Timeout(self.timeout)));
            let latency_ms = start.elapsed().as_millis() as u64;

            let (outcome, content) = match result {
                Ok(content) => match classifier::classify(&content, self.min_content_len) {
                    Classification::Ok => (AttemptOutcome::Ok, Some(content)),
                    Classification::Blocked => {
                        warn!(
                            url,
                            strategy = strategy.name(),
                            signal = classifier::matched_signal(&content).unwrap_or(""),
                            "Content looks like a block page"
                        );
                        (AttemptOutcome::Blocked, None)
                    }
                    Classification::Empty => (AttemptOutcome::Empty, None),
                },
                Err(FetchError::Blocked { status }) => {
                    warn!(url, strategy = strategy.name(), status, "Blocked by target");
                    (AttemptOutcome::Blocked, None)
                }
                Err(FetchError::Empty) => (AttemptOutcome::Empty, None),
                Err(e) => (AttemptOutcome::Error(e.to_string()), None),
            };

            info!(
                url,
                strategy = strategy.name(),
                rank,
                outcome = %outcome,
                latency_ms,
                "Fetch attempt"
            );

            attempts.push(FetchAttempt {
                rank,
                strategy: strategy.name().to_string(),
                outcome,
                latency_ms,
            });

            if let Some(content) = content {
                return Ok(Fetched {
                    content,
                    strategy: strategy.name().to_string(),
                    attempts,
                });
            }
        }

        let last = attempts
            .last()
            .map(|a| a.outcome.clone())
            .unwrap_or(AttemptOutcome::Error("no strategies".into()));
        Err(FetchFailure {
            url: url.to_string(),
            attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    const PAGE: &str = "<html><body><h1>Upcoming events</h1></body></html>";

    enum Script {
        Content(String),
        Fail(fn() -> FetchError),
        Hang,
    }

    struct Scripted {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
        released: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    /// Stands in for a browser session: flips `released` when dropped.
    struct SessionGuard(Arc<AtomicBool>);

    impl Drop for SessionGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PageFetcher for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _session = SessionGuard(Arc::clone(&self.released));
            match &self.script {
                Script::Content(c) => Ok(c.clone()),
                Script::Fail(f) => Err(f()),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn orchestrator(chain: Vec<Arc<Scripted>>) -> FetchOrchestrator {
        let chain: Vec<Arc<dyn PageFetcher>> =
            chain.into_iter().map(|s| s as Arc<dyn PageFetcher>).collect();
        FetchOrchestrator::new(chain, Duration::from_millis(50), 20).unwrap()
    }

    #[tokio::test]
    async fn blocked_then_ok_returns_second() {
        let s1 = Scripted::new("s1", Script::Content(format!("{PAGE} Access Denied")));
        let s2 = Scripted::new("s2", Script::Content(PAGE.to_string()));
        let orch = orchestrator(vec![s1.clone(), s2.clone()]);

        let got = orch.fetch("https://example.com/events").await.unwrap();
        assert_eq!(got.content, PAGE);
        assert_eq!(got.strategy, "s2");
        assert_eq!(got.attempts.len(), 2);
        assert_eq!(got.attempts[0].strategy, "s1");
        assert_eq!(got.attempts[0].outcome, AttemptOutcome::Blocked);
        assert_eq!(got.attempts[1].outcome, AttemptOutcome::Ok);
    }

    #[tokio::test]
    async fn first_ok_short_circuits() {
        let s1 = Scripted::new("s1", Script::Content(PAGE.to_string()));
        let s2 = Scripted::new("s2", Script::Content(PAGE.to_string()));
        let orch = orchestrator(vec![s1.clone(), s2.clone()]);

        orch.fetch("https://example.com").await.unwrap();
        assert_eq!(s1.calls.load(Ordering::SeqCst), 1);
        assert_eq!(s2.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_last_classification() {
        let s1 = Scripted::new("s1", Script::Fail(|| FetchError::Transport("refused".into())));
        let s2 = Scripted::new("s2", Script::Content("tiny".into()));
        let orch = orchestrator(vec![s1.clone(), s2.clone()]);

        let err = orch.fetch("https://example.com").await.err().unwrap();
        assert_eq!(err.attempts.len(), 2);
        assert!(matches!(err.attempts[0].outcome, AttemptOutcome::Error(_)));
        assert_eq!(err.last, AttemptOutcome::Empty);
        // never retried
        assert_eq!(s1.calls.load(Ordering::SeqCst), 1);
        assert_eq!(s2.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_block_status_counts_as_blocked() {
        let s1 = Scripted::new("s1", Script::Fail(|| FetchError::Blocked { status: 403 }));
        let orch = orchestrator(vec![s1]);
        let err = orch.fetch("https://example.com").await.err().unwrap();
        assert_eq!(err.last, AttemptOutcome::Blocked);
    }

    #[tokio::test]
    async fn timeout_advances_and_releases_session() {
        let slow = Scripted::new("slow", Script::Hang);
        let fast = Scripted::new("fast", Script::Content(PAGE.to_string()));
        let orch = orchestrator(vec![slow.clone(), fast.clone()]);

        let got = orch.fetch("https://example.com").await.unwrap();
        assert_eq!(got.strategy, "fast");
        assert!(matches!(&got.attempts[0].outcome, AttemptOutcome::Error(m) if m.contains("timed out")));
        assert!(slow.released.load(Ordering::SeqCst));
        assert!(fast.released.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(FetchOrchestrator::new(Vec::new(), Duration::from_secs(1), 10).is_err());
    }
}
