use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::{StoreConfig, StoreKind};
use crate::db::SqliteCatalogStore;
use crate::metrics::RunReport;
use crate::model::{EventRecord, LocalityCatalog, LocalityId};

/// Durable per-locality catalogs. `save_catalog` replaces the stored
/// generation as one unit; a failed save leaves the previous one readable.
pub trait CatalogStore: Send + Sync {
    fn load_catalog(&self, locality: &LocalityId) -> Result<Option<LocalityCatalog>>;

    fn save_catalog(&self, locality: &LocalityId, catalog: &LocalityCatalog) -> Result<()>;

    fn localities(&self) -> Result<Vec<LocalityId>>;

    fn record_run(&self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}

pub fn open(cfg: &StoreConfig) -> Result<Arc<dyn CatalogStore>> {
    Ok(match cfg.kind {
        StoreKind::Sqlite => Arc::new(SqliteCatalogStore::open(&cfg.path)?),
        StoreKind::Json => Arc::new(JsonCatalogStore::new(&cfg.path)),
    })
}

// ── Catalog document ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalityEntry {
    pub events: Vec<EventRecord>,
    pub total: usize,
    pub last_updated: DateTime<Utc>,
}

impl From<&LocalityCatalog> for LocalityEntry {
    fn from(catalog: &LocalityCatalog) -> Self {
        LocalityEntry {
            events: catalog.sorted_events().into_iter().cloned().collect(),
            total: catalog.len(),
            last_updated: catalog.last_updated,
        }
    }
}

/// `{ "last_updated": ..., "<locality>": { events, total, last_updated }, ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub localities: BTreeMap<String, LocalityEntry>,
}

impl CatalogDocument {
    pub fn empty() -> Self {
        CatalogDocument {
            last_updated: DateTime::<Utc>::default(),
            localities: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, catalog: &LocalityCatalog) {
        self.localities
            .insert(catalog.locality.to_string(), LocalityEntry::from(catalog));
        self.last_updated = self.last_updated.max(catalog.last_updated);
    }

    pub fn catalog(&self, locality: &LocalityId) -> Option<LocalityCatalog> {
        let entry = self.localities.get(&locality.to_string())?;
        Some(LocalityCatalog {
            locality: locality.clone(),
            events: entry
                .events
                .iter()
                .map(|e| (e.link.clone(), e.clone()))
                .collect(),
            last_updated: entry.last_updated,
        })
    }

    /// Snapshot every catalog a store holds.
    pub fn from_store(store: &dyn CatalogStore) -> Result<Self> {
        let mut doc = CatalogDocument::empty();
        for locality in store.localities()? {
            if let Some(catalog) = store.load_catalog(&locality)? {
                doc.insert(&catalog);
            }
        }
        Ok(doc)
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let doc = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        Ok(Some(doc))
    }

    /// Write to a temp file beside `path`, then rename over it.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| anyhow!("replacing {}: {}", path.display(), e.error))?;
        Ok(())
    }
}

// ── JSON file store ──

pub struct JsonCatalogStore {
    path: PathBuf,
    // All localities share one file.
    lock: Mutex<()>,
}

impl JsonCatalogStore {
    pub fn new(path: &Path) -> Self {
        JsonCatalogStore {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn document(&self) -> Result<CatalogDocument> {
        Ok(CatalogDocument::read(&self.path)?.unwrap_or_else(CatalogDocument::empty))
    }
}

impl CatalogStore for JsonCatalogStore {
    fn load_catalog(&self, locality: &LocalityId) -> Result<Option<LocalityCatalog>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(self.document()?.catalog(locality))
    }

    fn save_catalog(&self, locality: &LocalityId, catalog: &LocalityCatalog) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        debug_assert_eq!(&catalog.locality, locality);
        let mut doc = self.document()?;
        doc.insert(catalog);
        doc.write_atomic(&self.path)
    }

    fn localities(&self) -> Result<Vec<LocalityId>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(self
            .document()?
            .localities
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect())
    }
}
