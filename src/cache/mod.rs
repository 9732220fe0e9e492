//! Memoization of completed family networks.
//!
//! The in-memory map is the single point of truth once hydrated from the
//! persistence backend. All mutations go through one writer lock and are
//! followed by a full `save_all`; reads only take the map's shared lock.

mod persistence;

pub use persistence::{EntryMap, JsonFileBackend, MemoryBackend, PersistenceBackend};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OnceCell};

use crate::diagnostics::{CacheTier, Diagnostic, SharedSink};
use crate::errors::Result;
use crate::types::{
    normalize_family_id, AssemblyState, CacheStats, CachedNetworkEntry, FamilyId, FamilyNetwork,
};

/// Cache of completed networks keyed by normalized family id.
///
/// Entries are never evicted by size or age, only by `delete` or `clear`.
pub struct NetworkCache {
    entries: RwLock<EntryMap>,
    backend: Arc<dyn PersistenceBackend>,
    hydrated: OnceCell<()>,
    writer: Mutex<()>,
    last_stored: RwLock<Option<FamilyId>>,
    sink: SharedSink,
}

impl NetworkCache {
    pub fn new(backend: Arc<dyn PersistenceBackend>, sink: SharedSink) -> Self {
        Self {
            entries: RwLock::new(EntryMap::new()),
            backend,
            hydrated: OnceCell::new(),
            writer: Mutex::new(()),
            last_stored: RwLock::new(None),
            sink,
        }
    }

    fn memory_get(&self, key: &str) -> Option<Arc<CachedNetworkEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Looks up a network, memory first, then the backend. A backend hit is
    /// promoted into memory.
    pub async fn fetch(&self, family_id: &str) -> Result<Option<Arc<CachedNetworkEntry>>> {
        let key = normalize_family_id(family_id);
        if let Some(entry) = self.memory_get(&key) {
            self.sink.emit(Diagnostic::CacheHit {
                family_id: entry.id().clone(),
                tier: CacheTier::Memory,
            });
            return Ok(Some(entry));
        }
        if self.hydrated.initialized() {
            return Ok(None);
        }

        let mut loaded = self.backend.load_all().await?;
        let Some(found) = loaded.remove(&key) else {
            return Ok(None);
        };
        let entry = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.entry(key).or_insert(found).clone()
        };
        self.sink.emit(Diagnostic::CacheHit {
            family_id: entry.id().clone(),
            tier: CacheTier::Persistence,
        });
        Ok(Some(entry))
    }

    /// Stores a network under its main family's id, replacing any earlier
    /// entry, and persists the full map.
    pub async fn store(
        &self,
        network: FamilyNetwork,
        elapsed: Duration,
    ) -> Result<Arc<CachedNetworkEntry>> {
        self.store_entry(CachedNetworkEntry {
            network: Arc::new(network),
            created_at: Utc::now(),
            resolution_ms: elapsed.as_millis() as u64,
            state: AssemblyState::Complete,
            unresolved: Vec::new(),
            source_digest: None,
        })
        .await
    }

    /// Stores a fully built entry. See [`NetworkCache::store`].
    pub async fn store_entry(&self, entry: CachedNetworkEntry) -> Result<Arc<CachedNetworkEntry>> {
        let _guard = self.writer.lock().await;
        self.hydrate().await?;

        let id = entry.id().clone();
        let resolution_ms = entry.resolution_ms;
        let entry = Arc::new(entry);
        let snapshot = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(id.as_str().to_string(), entry.clone());
            entries.clone()
        };
        self.backend.save_all(&snapshot).await?;

        *self.last_stored.write().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        self.sink.emit(Diagnostic::CacheStored {
            family_id: id,
            resolution_ms,
        });
        Ok(entry)
    }

    /// Removes one entry. Returns whether anything was removed.
    pub async fn delete(&self, family_id: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        self.hydrate().await?;

        let key = normalize_family_id(family_id);
        let (removed, snapshot) = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let removed = entries.remove(&key).is_some();
            (removed, entries.clone())
        };
        if removed {
            self.backend.save_all(&snapshot).await?;
            self.sink.emit(Diagnostic::CacheDeleted {
                family_id: FamilyId::new(&key),
            });
        }
        Ok(removed)
    }

    /// Empties memory and the backend.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.backend.clear().await?;
        // The backend is empty now, so memory is authoritative.
        let _ = self.hydrated.set(());
        *self.last_stored.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.sink.emit(Diagnostic::CacheCleared);
        Ok(())
    }

    /// Every cached entry, loading persisted ones first.
    pub async fn entries(&self) -> Result<Vec<Arc<CachedNetworkEntry>>> {
        {
            let _guard = self.writer.lock().await;
            self.hydrate().await?;
        }
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(all)
    }

    /// The id most recently stored, used as a hint for what to prefetch next.
    pub fn last_stored(&self) -> Option<FamilyId> {
        self.last_stored
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Statistics over the entries currently in memory.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry_count = entries.len();
        let partial_count = entries.values().filter(|e| e.needs_review()).count();
        let total_resolution_ms: u64 = entries.values().map(|e| e.resolution_ms).sum();
        CacheStats {
            entry_count,
            partial_count,
            total_resolution_ms,
            mean_resolution_ms: if entry_count == 0 {
                0
            } else {
                total_resolution_ms / entry_count as u64
            },
        }
    }

    /// Merges persisted entries into memory once, before the first mutation,
    /// so a full `save_all` never drops entries an earlier process stored.
    /// Entries already in memory win.
    async fn hydrate(&self) -> Result<()> {
        self.hydrated
            .get_or_try_init(|| async {
                let loaded = self.backend.load_all().await?;
                let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
                for (_, entry) in loaded {
                    let key = entry.id().as_str().to_string();
                    entries.entry(key).or_insert(entry);
                }
                Ok::<_, crate::errors::FamilyWebError>(())
            })
            .await?;
        Ok(())
    }
}
