mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use family_web::cache::MemoryBackend;
use family_web::config::{save_config, WebConfig};
use family_web::diagnostics::{Diagnostic, RecordingSink};
use family_web::errors::{FamilyWebError, Result};
use family_web::sources::{StaticRegister, TextSource};
use family_web::types::*;
use family_web::FamilyWeb;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

/// Routes the default diagnostic sink to test output; `RUST_LOG=family_web=debug`
/// shows every resolution step.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    web: FamilyWeb,
    source: Arc<CountingSource>,
    parser: Arc<CountingParser>,
    sink: Arc<RecordingSink>,
}

fn setup(source: CountingSource) -> Fixture {
    let source = Arc::new(source);
    let parser = Arc::new(CountingParser::default());
    let sink = Arc::new(RecordingSink::new());
    let web = FamilyWeb::new(
        source.clone(),
        parser.clone(),
        Arc::new(MemoryBackend::new()),
        WebConfig::default(),
        sink.clone(),
    );
    Fixture {
        web,
        source,
        parser,
        sink,
    }
}

#[tokio::test]
async fn test_network_assembles_and_caches() {
    let fx = setup(CountingSource::new(register()));

    let entry = fx.web.network("Hyyppä 6").await.unwrap();
    assert_eq!(entry.id().as_str(), "HYYPPÄ 6");
    assert_eq!(entry.state, AssemblyState::Complete);
    assert_eq!(entry.network.family_count(), 4);
    assert!(entry.source_digest.is_some());

    let again = fx.web.network("HYYPPÄ 6").await.unwrap();
    assert!(Arc::ptr_eq(&entry, &again));
    assert_eq!(
        fx.sink
            .count(|e| matches!(e, Diagnostic::CacheStored { .. })),
        1
    );
}

#[tokio::test]
async fn test_collaborators_called_once_per_family() {
    let fx = setup(CountingSource::new(register()));

    fx.web.network("HYYPPÄ 6").await.unwrap();
    fx.web.network("HYYPPÄ 6").await.unwrap();
    fx.web.network("KORPI 9").await.unwrap();

    assert_eq!(fx.parser.max_calls(), 1);
    assert_eq!(fx.source.max_text_calls(), 1);
    assert_eq!(fx.parser.calls("KORPI 3"), 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_assembly() {
    let fx = setup(CountingSource::yielding(register()));

    let (a, b) = tokio::join!(fx.web.network("HYYPPÄ 6"), fx.web.network("hyyppä 6"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(fx.parser.calls("HYYPPÄ 6"), 1);
    assert_eq!(fx.parser.max_calls(), 1);
    assert_eq!(
        fx.sink
            .count(|e| matches!(e, Diagnostic::CacheStored { .. })),
        1
    );
}

/// Text source that holds back one family's text until `open` is called.
struct GatedSource {
    register: StaticRegister,
    gated: FamilyId,
    gate: Semaphore,
}

impl GatedSource {
    fn new(register: StaticRegister, gated: &str) -> Self {
        Self {
            register,
            gated: FamilyId::new(gated),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.close();
    }
}

#[async_trait]
impl TextSource for GatedSource {
    async fn extract_raw_text(&self, id: &FamilyId) -> Result<Option<String>> {
        if *id == self.gated {
            // Closing the semaphore releases every waiter.
            let _ = self.gate.acquire().await;
        }
        self.register.extract_raw_text(id).await
    }

    async fn list_family_ids(&self) -> Result<Vec<FamilyId>> {
        self.register.list_family_ids().await
    }
}

#[tokio::test]
async fn test_cancelled_assembly_caches_nothing_and_restarts() {
    let source = Arc::new(GatedSource::new(register(), "HYYPPÄ 5"));
    let parser = Arc::new(CountingParser::default());
    let web = FamilyWeb::new(
        source.clone(),
        parser.clone(),
        Arc::new(MemoryBackend::new()),
        WebConfig::default(),
        Arc::new(RecordingSink::new()),
    );

    let attempt = tokio::time::timeout(Duration::from_millis(20), web.network("HYYPPÄ 6")).await;
    assert!(attempt.is_err());
    assert!(web.cached("HYYPPÄ 6").await.unwrap().is_none());
    assert!(web.entries().await.unwrap().is_empty());

    source.open();
    let entry = web.network("HYYPPÄ 6").await.unwrap();
    assert_eq!(entry.state, AssemblyState::Complete);
    assert_eq!(entry.network.family_count(), 4);
    assert_eq!(parser.calls("HYYPPÄ 6"), 1);
    assert_eq!(parser.max_calls(), 1);
}

#[tokio::test]
async fn test_cancelled_assembly_releases_components() {
    let source = Arc::new(GatedSource::new(register(), "HYYPPÄ 5"));
    let web = FamilyWeb::new(
        source.clone(),
        parser(),
        Arc::new(MemoryBackend::new()),
        WebConfig::default(),
        Arc::new(RecordingSink::new()),
    );

    let attempt = tokio::time::timeout(Duration::from_millis(20), web.network("HYYPPÄ 6")).await;
    assert!(attempt.is_err());

    drop(web);
    assert_eq!(Arc::strong_count(&source), 1);
}

#[tokio::test]
async fn test_concurrent_failures_reach_every_caller() {
    let fx = setup(CountingSource::yielding(register()));

    let (a, b) = tokio::join!(fx.web.network("Nope 1"), fx.web.network("NOPE 1"));
    for err in [a.unwrap_err(), b.unwrap_err()] {
        assert!(err.to_string().contains("NOPE 1"));
    }
    assert!(fx.web.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_main_family() {
    let fx = setup(CountingSource::new(register()));
    let err = fx.web.network("Nope 1").await.unwrap_err();
    assert!(matches!(err, FamilyWebError::FamilyNotFound { ref family_id } if family_id == "NOPE 1"));
}

#[tokio::test]
async fn test_unparseable_main_family_is_fatal() {
    let mut register = register();
    register.insert_text("Rikki 1", "garbled scan");
    let fx = setup(CountingSource::new(register));

    let err = fx.web.network("Rikki 1").await.unwrap_err();
    assert!(matches!(err, FamilyWebError::Parse(_)));
    assert!(fx.web.cached("RIKKI 1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_main_family_is_fatal() {
    let mut register = register();
    register.insert_family(&Family::new("Tyhjä 1")).unwrap();
    let fx = setup(CountingSource::new(register));

    let err = fx.web.network("Tyhjä 1").await.unwrap_err();
    assert!(matches!(err, FamilyWebError::InvalidFamily { .. }));
}

#[tokio::test]
async fn test_partial_network_is_cached_for_review() {
    let mut main = hyyppa_6();
    main.couples[0].wife.as_mut().unwrap().origin_ref = Some("Rikki 1".to_string());
    let mut register = register();
    register.insert_family(&main).unwrap();
    register.insert_text("Rikki 1", "garbled scan");
    let fx = setup(CountingSource::new(register));

    let entry = fx.web.network("HYYPPÄ 6").await.unwrap();
    assert!(entry.needs_review());
    assert_eq!(entry.unresolved.len(), 1);
    assert_eq!(entry.unresolved[0].person, "Liisa");

    let stats = fx.web.stats();
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.partial_count, 1);
}

#[tokio::test]
async fn test_next_family_hint_and_prefetch() {
    let fx = setup(CountingSource::new(register()));
    assert!(fx.web.next_family_hint().await.unwrap().is_none());

    fx.web.network("HYYPPÄ 6").await.unwrap();
    assert_eq!(
        fx.web.next_family_hint().await.unwrap(),
        Some(FamilyId::new("KORPI 3"))
    );

    let handle = fx.web.prefetch_next().await.unwrap().expect("prefetch started");
    let prefetched = handle.await.unwrap().unwrap();
    assert_eq!(prefetched.id().as_str(), "KORPI 3");
    assert!(fx.web.cached("KORPI 3").await.unwrap().is_some());

    // KORPI 3 is now the most recent store; KORPI 9 follows it.
    assert_eq!(
        fx.web.next_family_hint().await.unwrap(),
        Some(FamilyId::new("KORPI 9"))
    );
}

#[tokio::test]
async fn test_last_family_has_no_hint() {
    let fx = setup(CountingSource::new(register()));
    fx.web.network("KORPI 9").await.unwrap();
    assert!(fx.web.next_family_hint().await.unwrap().is_none());
    assert!(fx.web.prefetch_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_entries_and_invalidate() {
    let fx = setup(CountingSource::new(register()));
    fx.web.network("HYYPPÄ 6").await.unwrap();
    fx.web.network("KORPI 9").await.unwrap();
    assert!(fx.web.stale_entries().await.unwrap().is_empty());

    let mut edited = hyyppa_6();
    edited.notes.push("Muutti Ouluun 1790".to_string());
    fx.source.replace(&edited);

    assert_eq!(
        fx.web.stale_entries().await.unwrap(),
        vec![FamilyId::new("HYYPPÄ 6")]
    );

    assert!(fx.web.invalidate("HYYPPÄ 6").await.unwrap());
    let rebuilt = fx.web.network("HYYPPÄ 6").await.unwrap();
    assert_eq!(rebuilt.network.main.notes, vec!["Muutti Ouluun 1790".to_string()]);
    assert!(fx.web.stale_entries().await.unwrap().is_empty());
    assert_eq!(fx.parser.calls("HYYPPÄ 6"), 2);
}

#[tokio::test]
async fn test_clear_cache_forces_reassembly() {
    let fx = setup(CountingSource::new(register()));
    let first = fx.web.network("HYYPPÄ 6").await.unwrap();
    fx.web.clear_cache().await.unwrap();
    assert!(fx.web.cached("HYYPPÄ 6").await.unwrap().is_none());

    let second = fx.web.network("HYYPPÄ 6").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.network, second.network);
    // Parsed records are still memoized.
    assert_eq!(fx.parser.max_calls(), 1);
}

#[tokio::test]
async fn test_extra_name_classes_from_config() {
    let config = WebConfig {
        extra_name_classes: vec![vec!["Kustaa".to_string(), "Gustaf".to_string()]],
        ..WebConfig::default()
    };
    let web = FamilyWeb::new(
        source(register()),
        parser(),
        Arc::new(MemoryBackend::new()),
        config,
        Arc::new(RecordingSink::new()),
    );
    assert!(web.names().are_equivalent("Kustaa", "Gustaf"));
    assert!(web.names().are_equivalent("Juho", "Johan"));
}

#[tokio::test]
async fn test_open_persists_across_instances() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    save_config(
        dir.path(),
        &WebConfig {
            cache_file: "web.json".to_string(),
            ..WebConfig::default()
        },
    )
    .unwrap();

    let first = FamilyWeb::open(dir.path(), source(register()), parser()).unwrap();
    let stored = first.network("HYYPPÄ 6").await.unwrap();
    assert!(dir.path().join(".familyweb").join("web.json").exists());

    let second = FamilyWeb::open(dir.path(), source(register()), parser()).unwrap();
    let loaded = second.cached("HYYPPÄ 6").await.unwrap().unwrap();
    assert_eq!(*loaded, *stored);
}

#[tokio::test]
async fn test_init_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let web = FamilyWeb::init(dir.path(), source(register()), parser()).unwrap();
    assert_eq!(web.config(), &WebConfig::default());
    assert!(dir.path().join(".familyweb").join("config.json").exists());
}
