use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::sources::TextSource;
use crate::types::{CachedNetworkEntry, FamilyId};

/// Compute SHA-256 content hash of a raw family text block.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Find cached networks whose main family text changed or disappeared since
/// they were assembled. Entries without a recorded digest are never stale.
///
/// Reads the source directly, bypassing any memoized text.
pub async fn find_stale_entries(
    source: &dyn TextSource,
    entries: &[Arc<CachedNetworkEntry>],
) -> Result<Vec<FamilyId>> {
    let mut stale = Vec::new();
    for entry in entries {
        let Some(recorded) = entry.source_digest.as_deref() else {
            continue;
        };
        match source.extract_raw_text(entry.id()).await? {
            Some(text) if content_hash(&text) == recorded => {}
            _ => stale.push(entry.id().clone()),
        }
    }
    Ok(stale)
}
