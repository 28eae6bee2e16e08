mod config;
mod datetime;
mod db;
mod fetch;
mod merge;
mod metrics;
mod model;
mod parser;
mod pipeline;
mod store;
mod validate;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::{AppConfig, StoreKind};
use crate::model::{LocalityId, Source};
use crate::store::{CatalogDocument, CatalogStore};

#[derive(Parser)]
#[command(name = "event_catalog", about = "Per-locality event catalogs from public listing sites")]
struct Cli {
    /// Config file (default: ./events.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract and merge events for the configured localities
    Run {
        /// Locality id such as ca--los-angeles (repeatable; default: all configured)
        #[arg(short, long = "locality")]
        localities: Vec<LocalityId>,
        /// Only run these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<Source>,
    },
    /// Show a locality's catalog, soonest first
    List {
        #[arg(short, long)]
        locality: LocalityId,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Catalog sizes per locality and recent runs
    Stats,
    /// Write the full catalog document as JSON
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Classify a saved page as ok, blocked or empty
    Classify { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            localities,
            sources,
        } => {
            let targets = pipeline::targets(&cfg, &localities);
            if targets.is_empty() {
                anyhow::bail!("No localities configured. Pass --locality or add [[localities]] to events.toml.");
            }
            let store = store::open(&cfg.store)?;
            let runner = pipeline::Pipeline::new(&cfg, store)?;

            let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, cancelling in-flight sources");
                    let _ = stop_tx.send(true);
                }
            });

            println!(
                "Running {} localities ({})...",
                targets.len(),
                targets
                    .iter()
                    .map(|t| t.id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let report = runner.run(&targets, &sources, stop_rx).await?;
            println!();
            report.print();
            match report.failed_localities() {
                0 => Ok(()),
                n => Err(anyhow::anyhow!("{} localities could not be saved", n)),
            }
        }
        Commands::List { locality, limit } => {
            let store = store::open(&cfg.store)?;
            let Some(catalog) = store.load_catalog(&locality)? else {
                println!("No catalog for {}. Run 'run --locality {}' first.", locality, locality);
                return Ok(());
            };
            if catalog.is_empty() {
                println!("Catalog for {} has no events yet.", locality);
                return Ok(());
            }

            println!(
                "{:>3} | {:<10} | {:<8} | {:<36} | {:<24} | {:<10}",
                "#", "Date", "Time", "Event", "Location", "Source"
            );
            println!("{}", "-".repeat(106));
            for (i, e) in catalog.sorted_events().iter().take(limit).enumerate() {
                println!(
                    "{:>3} | {:<10} | {:<8} | {:<36} | {:<24} | {:<10}",
                    i + 1,
                    e.date.to_string(),
                    e.time.to_string(),
                    truncate(&e.title, 36),
                    truncate(&e.location, 24),
                    e.source.as_str()
                );
            }
            println!(
                "\n{} of {} events | updated {}",
                limit.min(catalog.len()),
                catalog.len(),
                catalog.last_updated.format("%Y-%m-%d %H:%M UTC")
            );
            Ok(())
        }
        Commands::Stats => {
            let store = store::open(&cfg.store)?;
            print_stats(store.as_ref())?;
            if cfg.store.kind == StoreKind::Sqlite {
                let sqlite = db::SqliteCatalogStore::open(&cfg.store.path)?;
                let runs = sqlite.recent_runs(5)?;
                if !runs.is_empty() {
                    println!("\n--- Recent runs ---");
                    for r in runs {
                        println!(
                            "  {} ({}): {}/{} sources ok, {} events kept",
                            r.run_id, r.started, r.sources_ok, r.sources, r.accepted
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Export { out } => {
            let store = store::open(&cfg.store)?;
            let doc = CatalogDocument::from_store(store.as_ref())?;
            doc.write_atomic(&out)
                .with_context(|| format!("exporting to {}", out.display()))?;
            let events: usize = doc.localities.values().map(|l| l.total).sum();
            println!(
                "Wrote {} localities ({} events) to {}",
                doc.localities.len(),
                events,
                out.display()
            );
            Ok(())
        }
        Commands::Classify { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let class = fetch::classify(&content, cfg.fetch.min_content_len);
            println!("{:?} ({} bytes, threshold {})", class, content.len(), cfg.fetch.min_content_len);
            if let Some(signal) = fetch::classifier::matched_signal(&content) {
                println!("Signal: \"{}\"", signal);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_stats(store: &dyn CatalogStore) -> anyhow::Result<()> {
    let localities = store.localities()?;
    if localities.is_empty() {
        println!("No catalogs yet.");
        return Ok(());
    }

    println!(
        "{:<22} | {:>6} | {:>6} | {:>5} | {}",
        "Locality", "Events", "Dated", "TBA", "By source"
    );
    println!("{}", "-".repeat(90));
    let mut grand_total = 0;
    for id in &localities {
        let Some(catalog) = store.load_catalog(id)? else {
            continue;
        };
        let dated = catalog.events.values().filter(|e| e.date.is_known()).count();
        let mut by_source: BTreeMap<&str, usize> = BTreeMap::new();
        for e in catalog.events.values() {
            *by_source.entry(e.source.as_str()).or_default() += 1;
        }
        let breakdown = by_source
            .iter()
            .map(|(s, n)| format!("{} {}", s, n))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<22} | {:>6} | {:>6} | {:>5} | {}",
            id.to_string(),
            catalog.len(),
            dated,
            catalog.len() - dated,
            breakdown
        );
        grand_total += catalog.len();
    }
    println!("\n{} events across {} localities", grand_total, localities.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
