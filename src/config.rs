use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::fetch::StrategyKind;
use crate::model::{LocalityId, Source};

const ENV_PREFIX: &str = "EVENTS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub spider: SpiderConfig,
    pub browserless: BrowserlessConfig,
    pub chrome: ChromeConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub localities: Vec<LocalityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Fallback chain, tried in order. `None` picks a default from available credentials.
    pub strategies: Option<Vec<StrategyKind>>,
    pub timeout_secs: u64,
    pub min_content_len: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            strategies: None,
            timeout_secs: 30,
            min_content_len: 500,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpiderConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrowserlessConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromeConfig {
    pub binary: Option<String>,
    pub max_concurrent: usize,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        ChromeConfig {
            binary: None,
            max_concurrent: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub sources: Vec<Source>,
    pub description_max_chars: usize,
    pub enrich_tba: bool,
    pub max_enrichments: usize,
}

impl PipelineConfig {
    /// Sources enabled for a locality, in processing order.
    pub fn sources_for(&self, locality: &LocalityConfig) -> Vec<Source> {
        locality
            .sources
            .clone()
            .unwrap_or_else(|| self.sources.clone())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            concurrency: 6,
            sources: Source::ALL.to_vec(),
            description_max_chars: 500,
            enrich_tba: false,
            max_enrichments: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Sqlite,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            kind: StoreKind::Sqlite,
            path: PathBuf::from("data/events.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalityConfig {
    pub id: LocalityId,
    /// Replaces `pipeline.sources` for this locality.
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
    /// Source name (or alias) → listing URL.
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
}

impl LocalityConfig {
    pub fn bare(id: LocalityId) -> Self {
        LocalityConfig {
            id,
            sources: None,
            urls: BTreeMap::new(),
        }
    }

    /// Listing URL override for `source`, if one is configured.
    pub fn url_override(&self, source: Source) -> Option<&str> {
        self.urls.iter().find_map(|(key, url)| match key.parse::<Source>() {
            Ok(s) if s == source => Some(url.as_str()),
            _ => None,
        })
    }
}

impl AppConfig {
    /// Layer the optional TOML file under `EVENTS__SECTION__KEY` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(config::File::from(p.to_path_buf()).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("events").required(false));
            }
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let mut cfg: AppConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        if cfg.spider.api_key.is_none() {
            cfg.spider.api_key = std::env::var("SPIDER_API_KEY").ok();
        }
        if cfg.chrome.binary.is_none() {
            cfg.chrome.binary = std::env::var("CHROME_BIN").ok();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pipeline.concurrency > 0, "pipeline.concurrency must be > 0");
        anyhow::ensure!(self.fetch.timeout_secs > 0, "fetch.timeout_secs must be > 0");
        anyhow::ensure!(self.chrome.max_concurrent > 0, "chrome.max_concurrent must be > 0");
        if let Some(list) = &self.fetch.strategies {
            anyhow::ensure!(!list.is_empty(), "fetch.strategies must not be empty");
        }
        for loc in &self.localities {
            for key in loc.urls.keys() {
                if key.parse::<Source>().is_err() {
                    warn!(locality = %loc.id, key, "Ignoring URL override for unknown source");
                }
            }
        }
        Ok(())
    }

    /// The effective fallback chain.
    pub fn strategies(&self) -> Vec<StrategyKind> {
        if let Some(list) = &self.fetch.strategies {
            return list.clone();
        }
        let mut chain = vec![StrategyKind::Direct];
        if self.spider.api_key.is_some() {
            chain.push(StrategyKind::Spider);
        }
        if self.browserless.base_url.is_some() {
            chain.push(StrategyKind::Browserless);
        }
        chain
    }

    pub fn locality(&self, id: &LocalityId) -> Option<&LocalityConfig> {
        self.localities.iter().find(|l| &l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> AppConfig {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        settings.try_deserialize().unwrap()
    }

    #[test]
    fn defaults_apply() {
        let cfg = from_toml("");
        assert_eq!(cfg.fetch.timeout_secs, 30);
        assert_eq!(cfg.pipeline.sources.len(), 5);
        assert_eq!(cfg.store.kind, StoreKind::Sqlite);
        assert_eq!(cfg.strategies(), vec![StrategyKind::Direct]);
    }

    #[test]
    fn explicit_strategy_chain_and_overrides() {
        let cfg = from_toml(
            r#"
            [fetch]
            strategies = ["spider", "direct", "spider_chrome"]

            [pipeline]
            sources = ["Eventbrite", "dice"]

            [[localities]]
            id = "ca--los-angeles"
            sources = ["Luma"]
            urls = { luma = "https://lu.ma/la" }
            "#,
        );
        assert_eq!(
            cfg.strategies(),
            vec![StrategyKind::Spider, StrategyKind::Direct, StrategyKind::SpiderChrome]
        );
        assert_eq!(cfg.pipeline.sources, vec![Source::Eventbrite, Source::Dice]);

        let la = cfg.locality(&"ca--los-angeles".parse().unwrap()).unwrap();
        assert_eq!(cfg.pipeline.sources_for(la), vec![Source::Luma]);
        assert_eq!(la.url_override(Source::Luma), Some("https://lu.ma/la"));
        assert_eq!(la.url_override(Source::Meetup), None);
    }

    #[test]
    fn default_chain_follows_credentials() {
        let mut cfg = from_toml("");
        cfg.spider.api_key = Some("k".into());
        cfg.browserless.base_url = Some("http://localhost:3000".into());
        assert_eq!(
            cfg.strategies(),
            vec![StrategyKind::Direct, StrategyKind::Spider, StrategyKind::Browserless]
        );
    }
}
