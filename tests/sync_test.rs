use std::sync::Arc;

use chrono::Utc;
use family_web::sources::StaticRegister;
use family_web::sync::*;
use family_web::types::*;

fn entry(id: &str, digest: Option<String>) -> Arc<CachedNetworkEntry> {
    Arc::new(CachedNetworkEntry {
        network: Arc::new(FamilyNetwork::new(Family::new(id))),
        created_at: Utc::now(),
        resolution_ms: 0,
        state: AssemblyState::Complete,
        unresolved: Vec::new(),
        source_digest: digest,
    })
}

#[test]
fn test_content_hash_deterministic() {
    let hash1 = content_hash("KORPI 9 ...");
    let hash2 = content_hash("KORPI 9 ...");
    assert_eq!(hash1, hash2);
    assert_eq!(hash1.len(), 64);
}

#[test]
fn test_content_hash_different() {
    assert_ne!(content_hash("KORPI 9"), content_hash("KORPI 9 "));
}

#[tokio::test]
async fn test_find_stale_entries() {
    let mut register = StaticRegister::new();
    register.insert_text("Korpi 9", "unchanged");
    register.insert_text("Korpi 3", "edited");

    let entries = vec![
        entry("Korpi 9", Some(content_hash("unchanged"))),
        entry("Korpi 3", Some(content_hash("original"))),
        entry("Hyyppä 6", Some(content_hash("removed"))),
        entry("Hyyppä 5", None),
    ];

    let stale = find_stale_entries(&register, &entries).await.unwrap();
    assert_eq!(
        stale,
        vec![FamilyId::new("KORPI 3"), FamilyId::new("HYYPPÄ 6")]
    );
}
