use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::{LocalityId, Source};

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Fetched { strategy: String },
    Failed { last: String },
    Cancelled,
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Fetched { strategy } => write!(f, "ok via {}", strategy),
            SourceOutcome::Failed { last } => write!(f, "failed ({})", last),
            SourceOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl SourceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SourceOutcome::Fetched { .. } => "ok",
            SourceOutcome::Failed { .. } => "failed",
            SourceOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: Source,
    pub outcome: SourceOutcome,
    pub attempts: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub enriched: usize,
    pub latency_ms: i64,
}

impl SourceReport {
    pub fn cancelled(source: Source) -> Self {
        SourceReport {
            source,
            outcome: SourceOutcome::Cancelled,
            attempts: 0,
            candidates: 0,
            accepted: 0,
            rejected: 0,
            enriched: 0,
            latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalityReport {
    pub locality: LocalityId,
    pub sources: Vec<SourceReport>,
    pub added: usize,
    pub replaced: usize,
    pub total: usize,
    /// Set when the merge or save failed; the stored catalog is unchanged.
    pub error: Option<String>,
}

pub struct RunReport {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub localities: Vec<LocalityReport>,
}

impl RunReport {
    pub fn new(run_id: String, started: DateTime<Utc>) -> Self {
        RunReport {
            run_id,
            started,
            localities: Vec::new(),
        }
    }

    pub fn sources_ok(&self) -> usize {
        self.all_sources()
            .filter(|s| matches!(s.outcome, SourceOutcome::Fetched { .. }))
            .count()
    }

    pub fn sources_total(&self) -> usize {
        self.all_sources().count()
    }

    pub fn failed_localities(&self) -> usize {
        self.localities.iter().filter(|l| l.error.is_some()).count()
    }

    fn all_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.localities.iter().flat_map(|l| l.sources.iter())
    }

    pub fn print(&self) {
        println!(
            "{:<22} | {:<12} | {:<28} | {:>5} | {:>5} | {:>5}",
            "Locality", "Source", "Outcome", "Cand", "Kept", "Drop"
        );
        println!("{}", "-".repeat(92));
        for loc in &self.localities {
            for s in &loc.sources {
                println!(
                    "{:<22} | {:<12} | {:<28} | {:>5} | {:>5} | {:>5}",
                    loc.locality.to_string(),
                    s.source.as_str(),
                    s.outcome.to_string(),
                    s.candidates,
                    s.accepted,
                    s.rejected
                );
            }
            match &loc.error {
                Some(e) => println!("  {} merge failed: {}", loc.locality, e),
                None => println!(
                    "  {} catalog: {} events (+{} new, {} updated)",
                    loc.locality, loc.total, loc.added, loc.replaced
                ),
            }
        }
        println!(
            "\n{}: {}/{} sources ok, {} localities ({} failed)",
            self.run_id,
            self.sources_ok(),
            self.sources_total(),
            self.localities.len(),
            self.failed_localities()
        );
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_across_localities() {
        let la: LocalityId = "ca--los-angeles".parse().unwrap();
        let ny: LocalityId = "ny--new-york".parse().unwrap();
        let mut ok = SourceReport::cancelled(Source::Luma);
        ok.outcome = SourceOutcome::Fetched {
            strategy: "direct".into(),
        };
        let mut report = RunReport::new(new_run_id(), Utc::now());
        report.localities.push(LocalityReport {
            locality: la,
            sources: vec![ok, SourceReport::cancelled(Source::Dice)],
            added: 3,
            replaced: 0,
            total: 3,
            error: None,
        });
        report.localities.push(LocalityReport {
            locality: ny,
            sources: vec![SourceReport {
                outcome: SourceOutcome::Failed {
                    last: "blocked".into(),
                },
                ..SourceReport::cancelled(Source::Meetup)
            }],
            added: 0,
            replaced: 0,
            total: 0,
            error: Some("disk full".into()),
        });
        assert_eq!(report.sources_ok(), 1);
        assert_eq!(report.sources_total(), 3);
        assert_eq!(report.failed_localities(), 1);
        assert!(report.run_id.starts_with("run-"));
    }

    #[test]
    fn outcome_text() {
        let o = SourceOutcome::Fetched {
            strategy: "spider_chrome".into(),
        };
        assert_eq!(o.to_string(), "ok via spider_chrome");
        assert_eq!(o.label(), "ok");
        assert_eq!(SourceOutcome::Cancelled.to_string(), "cancelled");
    }
}
