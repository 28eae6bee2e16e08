use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::metrics::{RunReport, SourceOutcome};
use crate::model::{EventRecord, LocalityCatalog, LocalityId};
use crate::store::CatalogStore;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("opening database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS catalogs (
            locality     TEXT PRIMARY KEY,
            last_updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            locality    TEXT NOT NULL REFERENCES catalogs(locality),
            link        TEXT NOT NULL,
            title       TEXT NOT NULL,
            date        TEXT NOT NULL,
            time        TEXT NOT NULL,
            location    TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            source      TEXT NOT NULL,
            PRIMARY KEY (locality, link)
        );
        CREATE INDEX IF NOT EXISTS idx_events_date ON events(locality, date);
        CREATE INDEX IF NOT EXISTS idx_events_source ON events(source);

        -- One row per locality x source per run
        CREATE TABLE IF NOT EXISTS source_runs (
            id          INTEGER PRIMARY KEY,
            run_id      TEXT NOT NULL,
            locality    TEXT NOT NULL,
            source      TEXT NOT NULL,
            outcome     TEXT NOT NULL CHECK(outcome IN ('ok','failed','cancelled')),
            detail      TEXT,
            attempts    INTEGER NOT NULL DEFAULT 0,
            candidates  INTEGER NOT NULL DEFAULT 0,
            accepted    INTEGER NOT NULL DEFAULT 0,
            rejected    INTEGER NOT NULL DEFAULT 0,
            enriched    INTEGER NOT NULL DEFAULT 0,
            latency_ms  INTEGER,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_source_runs_run ON source_runs(run_id);
        ",
    )?;
    Ok(())
}

// ── Catalog store ──

pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(SqliteCatalogStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqliteCatalogStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummaryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, MIN(created_at),
                    SUM(outcome = 'ok'), COUNT(*), SUM(accepted)
             FROM source_runs
             GROUP BY run_id
             ORDER BY MIN(id) DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(RunSummaryRow {
                    run_id: row.get(0)?,
                    started: row.get(1)?,
                    sources_ok: row.get(2)?,
                    sources: row.get(3)?,
                    accepted: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

pub struct RunSummaryRow {
    pub run_id: String,
    pub started: String,
    pub sources_ok: i64,
    pub sources: i64,
    pub accepted: i64,
}

struct EventRow {
    link: String,
    title: String,
    date: String,
    time: String,
    location: String,
    description: String,
    source: String,
}

impl EventRow {
    fn into_record(self, locality: &LocalityId) -> Result<EventRecord> {
        Ok(EventRecord {
            date: self.date.parse().map_err(|e: String| anyhow!(e))?,
            time: self.time.parse().map_err(|e: String| anyhow!(e))?,
            source: self.source.parse().map_err(|e: String| anyhow!(e))?,
            title: self.title,
            link: self.link,
            location: self.location,
            description: self.description,
            locality: locality.clone(),
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn load_catalog(&self, locality: &LocalityId) -> Result<Option<LocalityCatalog>> {
        let conn = self.conn()?;
        let key = locality.to_string();
        let last_updated: Option<String> = conn
            .query_row(
                "SELECT last_updated FROM catalogs WHERE locality = ?1",
                [&key],
                |r| r.get(0),
            )
            .optional()?;
        let Some(last_updated) = last_updated else {
            return Ok(None);
        };
        let last_updated = DateTime::parse_from_rfc3339(&last_updated)
            .with_context(|| format!("bad last_updated for {}", key))?
            .with_timezone(&Utc);

        let mut stmt = conn.prepare(
            "SELECT link, title, date, time, location, description, source
             FROM events WHERE locality = ?1",
        )?;
        let rows = stmt
            .query_map([&key], |row| {
                Ok(EventRow {
                    link: row.get(0)?,
                    title: row.get(1)?,
                    date: row.get(2)?,
                    time: row.get(3)?,
                    location: row.get(4)?,
                    description: row.get(5)?,
                    source: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut catalog = LocalityCatalog::empty(locality.clone(), last_updated);
        for row in rows {
            let record = row.into_record(locality)?;
            catalog.events.insert(record.link.clone(), record);
        }
        Ok(Some(catalog))
    }

    /// Replace the locality's rows in one transaction.
    fn save_catalog(&self, locality: &LocalityId, catalog: &LocalityCatalog) -> Result<()> {
        let conn = self.conn()?;
        let key = locality.to_string();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO catalogs (locality, last_updated) VALUES (?1, ?2)
             ON CONFLICT(locality) DO UPDATE SET last_updated = excluded.last_updated",
            rusqlite::params![key, catalog.last_updated.to_rfc3339()],
        )?;
        tx.execute("DELETE FROM events WHERE locality = ?1", [&key])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events
                 (locality, link, title, date, time, location, description, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in catalog.events.values() {
                stmt.execute(rusqlite::params![
                    key,
                    e.link,
                    e.title,
                    e.date.to_string(),
                    e.time.to_string(),
                    e.location,
                    e.description,
                    e.source.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn localities(&self) -> Result<Vec<LocalityId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT locality FROM catalogs ORDER BY locality")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|s| s.parse().map_err(|e: String| anyhow!(e)))
            .collect()
    }

    fn record_run(&self, report: &RunReport) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO source_runs
                 (run_id, locality, source, outcome, detail, attempts,
                  candidates, accepted, rejected, enriched, latency_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for loc in &report.localities {
                for s in &loc.sources {
                    let detail = match &s.outcome {
                        SourceOutcome::Fetched { strategy } => Some(strategy.as_str()),
                        SourceOutcome::Failed { last } => Some(last.as_str()),
                        SourceOutcome::Cancelled => None,
                    };
                    stmt.execute(rusqlite::params![
                        report.run_id,
                        loc.locality.to_string(),
                        s.source.as_str(),
                        s.outcome.label(),
                        detail,
                        s.attempts as i64,
                        s.candidates as i64,
                        s.accepted as i64,
                        s.rejected as i64,
                        s.enriched as i64,
                        s.latency_ms,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LocalityReport, SourceReport};
    use crate::model::{EventDate, EventTime, Source};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn la() -> LocalityId {
        "ca--los-angeles".parse().unwrap()
    }

    fn record(link: &str, date: EventDate) -> EventRecord {
        EventRecord {
            title: "Warehouse Night".into(),
            link: link.into(),
            date,
            time: EventTime::At(NaiveTime::from_hms_opt(22, 0, 0).unwrap()),
            location: "Factory 93".into(),
            description: "All night long.".into(),
            source: Source::ResidentAdvisor,
            locality: la(),
        }
    }

    #[test]
    fn unknown_locality_loads_none() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        assert!(store.load_catalog(&la()).unwrap().is_none());
        assert!(store.localities().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_replaces_generation() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
        let mut cat = LocalityCatalog::empty(la(), t1);
        let d = EventDate::On(NaiveDate::from_ymd_opt(2026, 11, 7).unwrap());
        for link in ["https://ra.co/events/1", "https://ra.co/events/2"] {
            cat.events.insert(link.into(), record(link, d));
        }
        store.save_catalog(&la(), &cat).unwrap();
        assert_eq!(store.load_catalog(&la()).unwrap(), Some(cat.clone()));

        // A smaller generation fully replaces the stored one.
        cat.events.remove("https://ra.co/events/1");
        cat.events
            .insert("https://ra.co/events/3".into(), record("https://ra.co/events/3", EventDate::Tba));
        cat.last_updated = Utc.with_ymd_and_hms(2026, 10, 2, 9, 0, 0).unwrap();
        store.save_catalog(&la(), &cat).unwrap();
        let loaded = store.load_catalog(&la()).unwrap().unwrap();
        assert_eq!(loaded, cat);
        assert_eq!(store.localities().unwrap(), vec![la()]);
    }

    #[test]
    fn run_rows_recorded() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let mut report = RunReport::new("run-1".into(), Utc::now());
        let mut ok = SourceReport::cancelled(Source::Dice);
        ok.outcome = SourceOutcome::Fetched {
            strategy: "direct".into(),
        };
        ok.accepted = 4;
        report.localities.push(LocalityReport {
            locality: la(),
            sources: vec![ok, SourceReport::cancelled(Source::Luma)],
            added: 4,
            replaced: 0,
            total: 4,
            error: None,
        });
        store.record_run(&report).unwrap();

        let runs = store.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-1");
        assert_eq!((runs[0].sources_ok, runs[0].sources, runs[0].accepted), (1, 2, 4));
    }
}
