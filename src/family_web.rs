use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio::task::JoinHandle;

use crate::cache::{JsonFileBackend, NetworkCache, PersistenceBackend};
use crate::config::{get_cache_path, load_config, save_config, WebConfig};
use crate::corpus::Corpus;
use crate::diagnostics::{tracing_sink, SharedSink};
use crate::errors::{FamilyWebError, Result};
use crate::names::NameEquivalenceStore;
use crate::network::NetworkAssembler;
use crate::resolution::FamilyResolver;
use crate::sources::{RecordParser, TextSource};
use crate::sync;
use crate::types::*;

type AssemblyFuture =
    BoxFuture<'static, std::result::Result<Arc<CachedNetworkEntry>, Arc<FamilyWebError>>>;
type Assembly = Shared<AssemblyFuture>;

/// Central orchestrator: cache lookup, main family parsing, network assembly
/// and storage, with at most one assembly in flight per family id.
///
/// Cloning is cheap; clones share every component.
#[derive(Clone)]
pub struct FamilyWeb {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn TextSource>,
    corpus: Arc<Corpus>,
    names: Arc<NameEquivalenceStore>,
    assembler: NetworkAssembler,
    cache: NetworkCache,
    config: WebConfig,
    /// Running assemblies by normalized id. Only callers hold strong
    /// handles: once every caller is gone the assembly is dropped with them.
    in_flight: Mutex<HashMap<String, WeakShared<AssemblyFuture>>>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl FamilyWeb {
    /// Wires the components together around the given collaborators.
    ///
    /// The name store starts from the built-in variant classes plus
    /// `config.extra_name_classes`.
    pub fn new(
        source: Arc<dyn TextSource>,
        parser: Arc<dyn RecordParser>,
        backend: Arc<dyn PersistenceBackend>,
        config: WebConfig,
        sink: SharedSink,
    ) -> Self {
        let names = Arc::new(NameEquivalenceStore::with_defaults());
        for class in &config.extra_name_classes {
            names.learn_class(class.iter().map(String::as_str));
        }

        let corpus = Arc::new(Corpus::new(source.clone(), parser));
        let resolver = Arc::new(FamilyResolver::new(
            corpus.clone(),
            names.clone(),
            sink.clone(),
            config.resolver_options(),
        ));
        let assembler =
            NetworkAssembler::new(resolver, sink.clone(), config.max_parallel_resolutions);
        let cache = NetworkCache::new(backend, sink);

        Self {
            inner: Arc::new(Inner {
                source,
                corpus,
                names,
                assembler,
                cache,
                config,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Writes a default configuration under `project_root` and opens it.
    pub fn init(
        project_root: &Path,
        source: Arc<dyn TextSource>,
        parser: Arc<dyn RecordParser>,
    ) -> Result<Self> {
        save_config(project_root, &WebConfig::default())?;
        Self::open(project_root, source, parser)
    }

    /// Opens a workspace: loads `.familyweb/config.json` (defaults when
    /// absent) and persists the cache as JSON next to it.
    pub fn open(
        project_root: &Path,
        source: Arc<dyn TextSource>,
        parser: Arc<dyn RecordParser>,
    ) -> Result<Self> {
        let config = load_config(project_root)?;
        let backend = Arc::new(JsonFileBackend::new(get_cache_path(project_root, &config)));
        Ok(Self::new(source, parser, backend, config, tracing_sink()))
    }

    pub fn config(&self) -> &WebConfig {
        &self.inner.config
    }

    /// The name store shared by every assembly of this instance.
    pub fn names(&self) -> &Arc<NameEquivalenceStore> {
        &self.inner.names
    }
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

impl FamilyWeb {
    /// Returns the family network of `family_id`, from the cache when present,
    /// otherwise by assembling and caching it.
    ///
    /// Concurrent calls for the same id share one assembly and receive the
    /// same entry. Fails when the main family is missing, cannot be parsed or
    /// is invalid, or when persistence fails; unresolved references of the
    /// web never fail the call and are listed in the entry instead.
    pub async fn network(&self, family_id: &str) -> Result<Arc<CachedNetworkEntry>> {
        let key = normalize_family_id(family_id);
        if let Some(entry) = self.inner.cache.fetch(&key).await? {
            return Ok(entry);
        }

        let assembly = self.join_or_start(&key);
        let outcome = assembly.clone().await;

        {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let current = in_flight.get(&key).and_then(WeakShared::upgrade);
            if current.map_or(false, |a| a.ptr_eq(&assembly)) {
                in_flight.remove(&key);
            }
        }
        drop(assembly);

        outcome.map_err(|shared| Arc::try_unwrap(shared).unwrap_or_else(FamilyWebError::Coalesced))
    }

    /// Joins the running assembly of `key`, or starts one. An assembly whose
    /// callers were all cancelled is gone and is started afresh.
    fn join_or_start(&self, key: &str) -> Assembly {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = in_flight.get(key).and_then(WeakShared::upgrade) {
            return running;
        }

        in_flight.retain(|_, weak| weak.upgrade().is_some());
        let inner = Arc::clone(&self.inner);
        let id = FamilyId::new(key);
        let assembly = async move { inner.assemble(id).await.map_err(Arc::new) }
            .boxed()
            .shared();
        if let Some(weak) = assembly.downgrade() {
            in_flight.insert(key.to_string(), weak);
        }
        assembly
    }

    /// The cached network of `family_id`, without assembling on a miss.
    pub async fn cached(&self, family_id: &str) -> Result<Option<Arc<CachedNetworkEntry>>> {
        self.inner.cache.fetch(family_id).await
    }

    /// Drops the cached network of `family_id` together with the memoized
    /// text and record of that family. Returns whether a network was cached.
    pub async fn invalidate(&self, family_id: &str) -> Result<bool> {
        let id = FamilyId::new(family_id);
        self.inner.corpus.forget(&id);
        self.inner.cache.delete(id.as_str()).await
    }

    /// Empties the cache and its persistence backend.
    pub async fn clear_cache(&self) -> Result<()> {
        self.inner.cache.clear().await
    }

    /// Every cached network, ordered by family id.
    pub async fn entries(&self) -> Result<Vec<Arc<CachedNetworkEntry>>> {
        self.inner.cache.entries().await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }
}

// ---------------------------------------------------------------------------
// Prefetch and staleness
// ---------------------------------------------------------------------------

impl FamilyWeb {
    /// The family printed after the most recently stored one, if any.
    pub async fn next_family_hint(&self) -> Result<Option<FamilyId>> {
        let Some(last) = self.inner.cache.last_stored() else {
            return Ok(None);
        };
        let ids = self.inner.corpus.family_ids().await?;
        let next = ids
            .iter()
            .position(|id| id == &last)
            .and_then(|i| ids.get(i + 1))
            .cloned();
        Ok(next)
    }

    /// Starts assembling the hinted next family in the background.
    pub async fn prefetch_next(&self) -> Result<Option<JoinHandle<Result<Arc<CachedNetworkEntry>>>>> {
        let Some(next) = self.next_family_hint().await? else {
            return Ok(None);
        };
        let web = self.clone();
        Ok(Some(tokio::spawn(async move {
            web.network(next.as_str()).await
        })))
    }

    /// Ids of cached networks whose main family text has changed since the
    /// network was assembled.
    pub async fn stale_entries(&self) -> Result<Vec<FamilyId>> {
        let entries = self.inner.cache.entries().await?;
        sync::find_stale_entries(self.inner.source.as_ref(), &entries).await
    }
}

impl Inner {
    async fn assemble(self: Arc<Self>, id: FamilyId) -> Result<Arc<CachedNetworkEntry>> {
        // A caller that missed the cache just before an earlier assembly of
        // the same id finished lands here.
        if let Some(entry) = self.cache.fetch(id.as_str()).await? {
            return Ok(entry);
        }

        let start = Instant::now();

        // 1. Raw text and parsed main family
        let not_found = || FamilyWebError::FamilyNotFound {
            family_id: id.to_string(),
        };
        let text = self.corpus.raw_text(&id).await?.ok_or_else(not_found)?;
        let main = self.corpus.family(&id).await?.ok_or_else(not_found)?;

        // 2. Resolve the web
        let assembled = self.assembler.assemble(main.as_ref().clone()).await;

        // 3. Store the terminal result
        let entry = CachedNetworkEntry {
            network: Arc::new(assembled.network),
            created_at: Utc::now(),
            resolution_ms: start.elapsed().as_millis() as u64,
            state: assembled.state,
            unresolved: assembled.unresolved,
            source_digest: Some(sync::content_hash(&text)),
        };
        self.cache.store_entry(entry).await
    }
}
