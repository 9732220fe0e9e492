use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::{FamilyWebError, Result};
use crate::types::CachedNetworkEntry;

/// Cached entries keyed by normalized family id.
pub type EntryMap = HashMap<String, Arc<CachedNetworkEntry>>;

/// Durable storage behind the network cache. The cache always hands over the
/// full map; there is no incremental contract.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn load_all(&self) -> Result<EntryMap>;
    async fn save_all(&self, entries: &EntryMap) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Keeps the persisted map in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<EntryMap>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load_all(&self) -> Result<EntryMap> {
        Ok(self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn save_all(&self, entries: &EntryMap) -> Result<()> {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

/// Stores the whole map as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(operation: &str, message: String) -> FamilyWebError {
        FamilyWebError::Persistence {
            message,
            operation: operation.to_string(),
        }
    }
}

#[async_trait]
impl PersistenceBackend for JsonFileBackend {
    /// A missing file loads as an empty map.
    async fn load_all(&self) -> Result<EntryMap> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(EntryMap::new());
        }
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Self::error(
                "load_all",
                format!("failed to read cache file '{}': {}", self.path.display(), e),
            )
        })?;
        let entries: EntryMap = serde_json::from_str(&contents).map_err(|e| {
            Self::error(
                "load_all",
                format!("failed to parse cache file '{}': {}", self.path.display(), e),
            )
        })?;
        Ok(entries)
    }

    /// Writes to a temporary file first and then renames it into place, so a
    /// partial write never corrupts the cache file.
    async fn save_all(&self, entries: &EntryMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Self::error(
                    "save_all",
                    format!("failed to create cache directory '{}': {}", parent.display(), e),
                )
            })?;
        }

        // Sorted keys keep the file stable between saves.
        let ordered: BTreeMap<&String, &Arc<CachedNetworkEntry>> = entries.iter().collect();
        let json = serde_json::to_string_pretty(&ordered)
            .map_err(|e| Self::error("save_all", format!("failed to serialize cache: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            Self::error(
                "save_all",
                format!(
                    "failed to write temporary cache file '{}': {}",
                    tmp_path.display(),
                    e
                ),
            )
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            Self::error(
                "save_all",
                format!(
                    "failed to rename temporary cache file '{}' to '{}': {}",
                    tmp_path.display(),
                    self.path.display(),
                    e
                ),
            )
        })?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::error(
                "clear",
                format!("failed to remove cache file '{}': {}", self.path.display(), e),
            )),
        }
    }
}
