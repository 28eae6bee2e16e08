use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{Local, NaiveDateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use scraper::Html;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppConfig, LocalityConfig, PipelineConfig};
use crate::datetime;
use crate::fetch::{self, FetchOrchestrator};
use crate::merge::{self, MergeStats};
use crate::metrics::{new_run_id, LocalityReport, RunReport, SourceOutcome, SourceReport};
use crate::model::{CandidateRecord, EventRecord, EventTime, LocalityId, Source, LOCATION_TBA};
use crate::parser::extract::extractor_for;
use crate::parser::jsonld;
use crate::store::CatalogStore;
use crate::validate::RecordValidator;

/// One in-flight merge per locality key.
#[derive(Default)]
pub struct LocalityLocks {
    inner: StdMutex<HashMap<LocalityId, Arc<Mutex<()>>>>,
}

impl LocalityLocks {
    pub fn get(&self, locality: &LocalityId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(locality.clone()).or_default())
    }
}

struct Shared {
    orchestrator: FetchOrchestrator,
    validator: RecordValidator,
    settings: PipelineConfig,
}

pub struct Pipeline {
    shared: Arc<Shared>,
    store: Arc<dyn CatalogStore>,
    locks: Arc<LocalityLocks>,
}

/// A finished (or cancelled) source task for one locality.
struct SourceDone {
    locality: LocalityId,
    rank: usize,
    report: SourceReport,
    records: Vec<EventRecord>,
}

impl Pipeline {
    pub fn new(cfg: &AppConfig, store: Arc<dyn CatalogStore>) -> Result<Self> {
        let orchestrator = FetchOrchestrator::new(
            fetch::build_strategies(cfg)?,
            Duration::from_secs(cfg.fetch.timeout_secs),
            cfg.fetch.min_content_len,
        )?;
        info!(strategies = ?orchestrator.strategy_names(), "Fetch chain");
        Ok(Self::with_orchestrator(orchestrator, cfg.pipeline.clone(), store))
    }

    pub fn with_orchestrator(
        orchestrator: FetchOrchestrator,
        settings: PipelineConfig,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        Pipeline {
            shared: Arc::new(Shared {
                orchestrator,
                validator: RecordValidator::new(settings.description_max_chars),
                settings,
            }),
            store,
            locks: Arc::new(LocalityLocks::default()),
        }
    }

    /// Run every enabled source for each locality, then fold each locality's
    /// records into its catalog. Source failures only show up in the report;
    /// a merge or save failure marks that locality and the run carries on.
    pub async fn run(
        &self,
        targets: &[LocalityConfig],
        only: &[Source],
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(new_run_id(), Utc::now());
        let semaphore = Arc::new(Semaphore::new(self.shared.settings.concurrency));
        let (tx, mut rx) = mpsc::channel::<SourceDone>(self.shared.settings.concurrency * 2);

        let mut pending: HashMap<LocalityId, usize> = HashMap::new();
        for target in targets {
            let sources: Vec<Source> = self
                .shared
                .settings
                .sources_for(target)
                .into_iter()
                .filter(|s| only.is_empty() || only.contains(s))
                .collect();

            for (rank, source) in sources.into_iter().enumerate() {
                *pending.entry(target.id.clone()).or_default() += 1;
                let shared = Arc::clone(&self.shared);
                let sem = Arc::clone(&semaphore);
                let tx = tx.clone();
                let mut shutdown = shutdown.clone();
                let locality = target.id.clone();
                let url_override = target.url_override(source).map(str::to_string);

                tokio::spawn(async move {
                    let permit = tokio::select! {
                        p = sem.acquire() => p.ok(),
                        _ = cancelled(&mut shutdown) => None,
                    };
                    let (report, records) = match permit {
                        Some(_permit) => {
                            run_source(&shared, &locality, source, url_override, shutdown).await
                        }
                        None => (SourceReport::cancelled(source), Vec::new()),
                    };
                    let _ = tx
                        .send(SourceDone {
                            locality,
                            rank,
                            report,
                            records,
                        })
                        .await;
                });
            }
        }
        drop(tx);

        let total: usize = pending.values().sum();
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} sources ({msg})")?
                .progress_chars("=> "),
        );

        let mut finished: HashMap<LocalityId, Vec<SourceDone>> = HashMap::new();
        let mut merges = JoinSet::new();

        while let Some(done) = rx.recv().await {
            pb.inc(1);
            pb.set_message(format!("{} {}", done.locality, done.report.source));
            let locality = done.locality.clone();
            finished.entry(locality.clone()).or_default().push(done);

            let left = pending.get_mut(&locality).map(|n| {
                *n -= 1;
                *n
            });
            if left == Some(0) {
                if let Some(dones) = finished.remove(&locality) {
                    merges.spawn(finish_locality(
                        Arc::clone(&self.store),
                        Arc::clone(&self.locks),
                        locality,
                        dones,
                    ));
                }
            }
        }
        // Tasks that died without reporting leave their locality here.
        for (locality, dones) in finished.drain() {
            merges.spawn(finish_locality(
                Arc::clone(&self.store),
                Arc::clone(&self.locks),
                locality,
                dones,
            ));
        }
        pb.finish_and_clear();

        while let Some(joined) = merges.join_next().await {
            match joined {
                Ok(loc) => report.localities.push(loc),
                Err(e) => warn!(error = %e, "Merge task failed"),
            }
        }
        report
            .localities
            .sort_by(|a, b| a.locality.cmp(&b.locality));

        let store = Arc::clone(&self.store);
        let persisted = tokio::task::spawn_blocking(move || {
            let result = store.record_run(&report);
            (report, result)
        })
        .await?;
        let (report, result) = persisted;
        if let Err(e) = result {
            warn!(error = %e, "Could not record run report");
        }
        Ok(report)
    }
}

async fn finish_locality(
    store: Arc<dyn CatalogStore>,
    locks: Arc<LocalityLocks>,
    locality: LocalityId,
    mut dones: Vec<SourceDone>,
) -> LocalityReport {
    // Configured source order decides same-link collisions: later wins.
    dones.sort_by_key(|d| d.rank);
    let any_fetched = dones
        .iter()
        .any(|d| matches!(d.report.outcome, SourceOutcome::Fetched { .. }));
    let mut sources = Vec::with_capacity(dones.len());
    let mut batch = Vec::new();
    for done in dones {
        sources.push(done.report);
        batch.extend(done.records);
    }

    let result = merge_and_save(store, &locks, &locality, batch, any_fetched).await;
    match result {
        Ok((stats, total)) => LocalityReport {
            locality,
            sources,
            added: stats.added,
            replaced: stats.replaced,
            total,
            error: None,
        },
        Err(e) => {
            warn!(locality = %locality, error = %e, "Catalog update failed; previous generation kept");
            LocalityReport {
                locality,
                sources,
                added: 0,
                replaced: 0,
                total: 0,
                error: Some(format!("{e:#}")),
            }
        }
    }
}

/// Load, merge and save under the locality's lock. With no fetched source the
/// stored catalog is left untouched.
pub async fn merge_and_save(
    store: Arc<dyn CatalogStore>,
    locks: &LocalityLocks,
    locality: &LocalityId,
    batch: Vec<EventRecord>,
    any_fetched: bool,
) -> Result<(MergeStats, usize)> {
    let lock = locks.get(locality);
    let _held = lock.lock().await;
    let locality = locality.clone();

    tokio::task::spawn_blocking(move || {
        let previous = store.load_catalog(&locality)?;
        if !any_fetched {
            return Ok((MergeStats::default(), previous.map_or(0, |c| c.len())));
        }
        let (next, stats) = merge::merge(previous, &locality, batch, Utc::now());
        store.save_catalog(&locality, &next)?;
        Ok((stats, next.len()))
    })
    .await?
}

async fn run_source(
    shared: &Shared,
    locality: &LocalityId,
    source: Source,
    url_override: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) -> (SourceReport, Vec<EventRecord>) {
    let start = Instant::now();
    let extractor = extractor_for(source);
    debug_assert_eq!(extractor.source(), source);
    let url = url_override.unwrap_or_else(|| extractor.listing_url(locality));
    let mut report = SourceReport::cancelled(source);

    let base = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            warn!(%source, locality = %locality, url = %url, error = %e, "Bad listing URL");
            report.outcome = SourceOutcome::Failed {
                last: format!("invalid url: {e}"),
            };
            return (report, Vec::new());
        }
    };

    let fetched = tokio::select! {
        r = shared.orchestrator.fetch(&url) => r,
        _ = cancelled(&mut shutdown) => {
            info!(%source, locality = %locality, "Cancelled during fetch");
            return (report, Vec::new());
        }
    };
    let fetched = match fetched {
        Ok(f) => f,
        Err(failure) => {
            warn!(%source, locality = %locality, error = %failure, "Source unavailable");
            report.attempts = failure.attempts.len();
            report.outcome = SourceOutcome::Failed {
                last: failure.last.to_string(),
            };
            report.latency_ms = start.elapsed().as_millis() as i64;
            return (report, Vec::new());
        }
    };
    report.attempts = fetched.attempts.len();
    report.outcome = SourceOutcome::Fetched {
        strategy: fetched.strategy.clone(),
    };

    let validator = shared.validator.clone();
    let content = fetched.content;
    let loc = locality.clone();
    let processed = tokio::task::spawn_blocking(move || {
        let candidates = extractor.extract(&content, &base);
        let n = candidates.len();
        (n, process_candidates(&validator, &candidates, source, &loc, reference_now()))
    })
    .await;
    let (candidates, mut records) = match processed {
        Ok(v) => v,
        Err(e) => {
            warn!(%source, locality = %locality, error = %e, "Extraction task failed");
            (0, Vec::new())
        }
    };
    report.candidates = candidates;
    report.accepted = records.len();
    report.rejected = candidates - records.len();

    if shared.settings.enrich_tba {
        report.enriched = enrich(shared, &mut records, &mut shutdown).await;
    }
    report.latency_ms = start.elapsed().as_millis() as i64;

    info!(
        %source,
        locality = %locality,
        strategy = %fetched.strategy,
        candidates = report.candidates,
        accepted = report.accepted,
        "Source done"
    );
    (report, records)
}

/// Normalize and validate in parallel, keeping extraction order.
fn process_candidates(
    validator: &RecordValidator,
    candidates: &[CandidateRecord],
    source: Source,
    locality: &LocalityId,
    reference: NaiveDateTime,
) -> Vec<EventRecord> {
    candidates
        .par_iter()
        .map(|c| {
            let when = datetime::normalize(&c.when, reference);
            validator.validate(c, when, source, locality)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .zip(candidates)
        .filter_map(|(result, cand)| match result {
            Ok(rec) => Some(rec),
            Err(reason) => {
                debug!(%source, title = %cand.title, link = %cand.link, %reason, "Rejected candidate");
                None
            }
        })
        .collect()
}

/// Re-fetch event pages for records still missing a date and take the date,
/// time and venue from their structured metadata. Returns how many improved.
async fn enrich(
    shared: &Shared,
    records: &mut [EventRecord],
    shutdown: &mut watch::Receiver<bool>,
) -> usize {
    let mut enriched = 0;
    let targets = records
        .iter_mut()
        .filter(|r| !r.date.is_known())
        .take(shared.settings.max_enrichments);

    for rec in targets {
        let fetched = tokio::select! {
            r = shared.orchestrator.fetch(&rec.link) => r,
            _ = cancelled(shutdown) => break,
        };
        match fetched {
            Ok(page) => {
                if enrich_from_page(rec, &page.content, reference_now()) {
                    enriched += 1;
                }
            }
            Err(e) => debug!(link = %rec.link, error = %e, "Enrichment fetch failed"),
        }
    }
    enriched
}

fn enrich_from_page(rec: &mut EventRecord, content: &str, reference: NaiveDateTime) -> bool {
    let Ok(base) = Url::parse(&rec.link) else {
        return false;
    };
    let doc = Html::parse_document(content);
    let Some(detail) = jsonld::candidates(&doc, &base)
        .into_iter()
        .find(|c| !c.when.is_empty())
    else {
        return false;
    };

    let (date, time) = datetime::normalize(&detail.when, reference);
    if !date.is_known() {
        return false;
    }
    rec.date = date;
    if time != EventTime::Tba {
        rec.time = time;
    }
    if rec.location == LOCATION_TBA {
        if let Some(loc) = detail.location {
            rec.location = loc;
        }
    }
    true
}

fn reference_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone
/// without signalling.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Resolve `--locality` arguments against configured localities; ids without
/// a config entry run with defaults.
pub fn targets(cfg: &AppConfig, ids: &[LocalityId]) -> Vec<LocalityConfig> {
    if ids.is_empty() {
        return cfg.localities.clone();
    }
    ids.iter()
        .map(|id| {
            cfg.locality(id)
                .cloned()
                .unwrap_or_else(|| LocalityConfig::bare(id.clone()))
        })
        .collect()
}
