mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use family_web::cache::{JsonFileBackend, MemoryBackend, NetworkCache, PersistenceBackend};
use family_web::diagnostics::{CacheTier, Diagnostic, RecordingSink};
use family_web::types::*;
use tempfile::TempDir;

fn network(main: Family) -> FamilyNetwork {
    let mut network = FamilyNetwork::new(main);
    network
        .parent_origins
        .insert(FamilyId::new("HYYPPÄ 5"), hyyppa_5());
    network
}

fn cache_on(backend: Arc<dyn PersistenceBackend>) -> (NetworkCache, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    (NetworkCache::new(backend, sink.clone()), sink)
}

#[tokio::test]
async fn test_store_then_fetch_round_trip() {
    let (cache, _sink) = cache_on(Arc::new(MemoryBackend::new()));
    let stored = network(hyyppa_6());

    cache
        .store(stored.clone(), Duration::from_millis(42))
        .await
        .unwrap();
    let fetched = cache.fetch("HYYPPÄ 6").await.unwrap().unwrap();

    assert_eq!(*fetched.network, stored);
    assert_eq!(fetched.resolution_ms, 42);
    assert_eq!(fetched.state, AssemblyState::Complete);
}

#[tokio::test]
async fn test_fetch_normalizes_id() {
    let (cache, _sink) = cache_on(Arc::new(MemoryBackend::new()));
    cache
        .store(network(korpi_9()), Duration::ZERO)
        .await
        .unwrap();

    assert!(cache.fetch("  korpi   9 ").await.unwrap().is_some());
    assert!(cache.fetch("Korpi 9").await.unwrap().is_some());
    assert!(cache.fetch("Korpi 3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_store_overwrites_entry() {
    let (cache, _sink) = cache_on(Arc::new(MemoryBackend::new()));
    cache
        .store(FamilyNetwork::new(hyyppa_6()), Duration::from_millis(1))
        .await
        .unwrap();
    cache
        .store(network(hyyppa_6()), Duration::from_millis(2))
        .await
        .unwrap();

    let fetched = cache.fetch("HYYPPÄ 6").await.unwrap().unwrap();
    assert_eq!(fetched.network.family_count(), 2);
    assert_eq!(cache.stats().entry_count, 1);
}

#[tokio::test]
async fn test_fetch_promotes_persisted_entry() {
    let backend = Arc::new(MemoryBackend::new());
    let (writer, _) = cache_on(backend.clone());
    writer
        .store(network(hyyppa_6()), Duration::ZERO)
        .await
        .unwrap();

    let (reader, sink) = cache_on(backend);
    assert!(reader.fetch("HYYPPÄ 6").await.unwrap().is_some());
    assert!(reader.fetch("HYYPPÄ 6").await.unwrap().is_some());

    let tiers: Vec<CacheTier> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Diagnostic::CacheHit { tier, .. } => Some(tier),
            _ => None,
        })
        .collect();
    assert_eq!(tiers, vec![CacheTier::Persistence, CacheTier::Memory]);
}

#[tokio::test]
async fn test_store_keeps_entries_of_earlier_process() {
    let backend = Arc::new(MemoryBackend::new());
    let (first, _) = cache_on(backend.clone());
    first
        .store(network(hyyppa_6()), Duration::ZERO)
        .await
        .unwrap();

    let (second, _) = cache_on(backend.clone());
    second
        .store(FamilyNetwork::new(korpi_9()), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(backend.len(), 2);
    assert_eq!(second.entries().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_and_clear() {
    let backend = Arc::new(MemoryBackend::new());
    let (cache, sink) = cache_on(backend.clone());
    cache
        .store(network(hyyppa_6()), Duration::ZERO)
        .await
        .unwrap();
    cache
        .store(FamilyNetwork::new(korpi_9()), Duration::ZERO)
        .await
        .unwrap();

    assert!(cache.delete("hyyppä 6").await.unwrap());
    assert!(!cache.delete("hyyppä 6").await.unwrap());
    assert!(cache.fetch("HYYPPÄ 6").await.unwrap().is_none());
    assert_eq!(backend.len(), 1);

    cache.clear().await.unwrap();
    assert!(backend.is_empty());
    assert!(cache.fetch("KORPI 9").await.unwrap().is_none());
    assert!(cache.last_stored().is_none());
    assert_eq!(
        sink.count(|e| matches!(e, Diagnostic::CacheCleared)),
        1
    );
}

#[tokio::test]
async fn test_last_stored_tracks_most_recent() {
    let (cache, _sink) = cache_on(Arc::new(MemoryBackend::new()));
    assert!(cache.last_stored().is_none());

    cache
        .store(FamilyNetwork::new(hyyppa_6()), Duration::ZERO)
        .await
        .unwrap();
    cache
        .store(FamilyNetwork::new(korpi_9()), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(cache.last_stored(), Some(FamilyId::new("KORPI 9")));
}

#[tokio::test]
async fn test_stats_count_partial_entries() {
    let (cache, _sink) = cache_on(Arc::new(MemoryBackend::new()));
    cache
        .store(FamilyNetwork::new(hyyppa_6()), Duration::from_millis(10))
        .await
        .unwrap();
    cache
        .store_entry(CachedNetworkEntry {
            network: Arc::new(FamilyNetwork::new(korpi_9())),
            created_at: Utc::now(),
            resolution_ms: 30,
            state: AssemblyState::PartiallyComplete,
            unresolved: Vec::new(),
            source_digest: None,
        })
        .await
        .unwrap();

    let stats = cache.stats();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.partial_count, 1);
    assert_eq!(stats.total_resolution_ms, 40);
    assert_eq!(stats.mean_resolution_ms, 20);
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_json_backend_missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let backend = JsonFileBackend::new(dir.path().join("networks.json"));
    assert!(backend.load_all().await.unwrap().is_empty());
    backend.clear().await.unwrap();
}

#[tokio::test]
async fn test_json_backend_round_trip_across_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".familyweb").join("networks.json");
    let stored = network(hyyppa_6());

    let (writer, _) = cache_on(Arc::new(JsonFileBackend::new(&path)));
    let original = writer
        .store(stored.clone(), Duration::from_millis(7))
        .await
        .unwrap();
    assert!(path.exists());

    let (reader, _) = cache_on(Arc::new(JsonFileBackend::new(&path)));
    let fetched = reader.fetch("HYYPPÄ 6").await.unwrap().unwrap();
    assert_eq!(*fetched, *original);
    assert_eq!(*fetched.network, stored);
}

#[tokio::test]
async fn test_json_backend_clear_removes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("networks.json");
    let (cache, _) = cache_on(Arc::new(JsonFileBackend::new(&path)));
    cache
        .store(FamilyNetwork::new(korpi_9()), Duration::ZERO)
        .await
        .unwrap();
    assert!(path.exists());

    cache.clear().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_json_backend_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("networks.json");
    std::fs::write(&path, "not json").unwrap();

    let (cache, _) = cache_on(Arc::new(JsonFileBackend::new(&path)));
    let err = cache.fetch("KORPI 9").await.unwrap_err();
    assert!(err.to_string().contains("load_all"));
}
