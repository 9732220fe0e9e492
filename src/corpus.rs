//! Memoizing front for the text source and record parser.
//!
//! Raw text and parsed records are fetched at most once per family id for the
//! lifetime of a `Corpus`, even under concurrent requests: each id owns a
//! `OnceCell` slot, and every caller waits on the same slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::dates::text_contains_date;
use crate::errors::{FamilyWebError, ParseFailure, Result};
use crate::sources::{RecordParser, TextSource};
use crate::types::{Family, FamilyId};

type TextSlot = Arc<OnceCell<Option<Arc<str>>>>;
type RecordSlot = Arc<OnceCell<std::result::Result<Arc<Family>, RecordFailure>>>;

#[derive(Debug, Clone)]
enum RecordFailure {
    Parse(ParseFailure),
    Invalid(String),
}

/// Memoized access to the register.
pub struct Corpus {
    source: Arc<dyn TextSource>,
    parser: Arc<dyn RecordParser>,
    texts: Mutex<HashMap<FamilyId, TextSlot>>,
    records: Mutex<HashMap<FamilyId, RecordSlot>>,
    ids: OnceCell<Arc<Vec<FamilyId>>>,
}

impl Corpus {
    pub fn new(source: Arc<dyn TextSource>, parser: Arc<dyn RecordParser>) -> Self {
        Self {
            source,
            parser,
            texts: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            ids: OnceCell::new(),
        }
    }

    fn text_slot(&self, id: &FamilyId) -> TextSlot {
        let mut texts = self.texts.lock().unwrap_or_else(|e| e.into_inner());
        texts.entry(id.clone()).or_default().clone()
    }

    fn record_slot(&self, id: &FamilyId) -> RecordSlot {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.entry(id.clone()).or_default().clone()
    }

    /// The raw text of a family, or `None` when the register has no such id.
    ///
    /// A source error is not memoized; the next call retries.
    pub async fn raw_text(&self, id: &FamilyId) -> Result<Option<Arc<str>>> {
        let slot = self.text_slot(id);
        let text = slot
            .get_or_try_init(|| async {
                let text = self.source.extract_raw_text(id).await?;
                Ok::<_, FamilyWebError>(text.map(Arc::from))
            })
            .await?;
        Ok(text.clone())
    }

    /// The parsed record of a family, or `None` when the register has no such
    /// id. Parse failures and invalid records are memoized like successes, so
    /// a failing id is never sent to the parser twice.
    pub async fn family(&self, id: &FamilyId) -> Result<Option<Arc<Family>>> {
        let Some(text) = self.raw_text(id).await? else {
            return Ok(None);
        };
        let slot = self.record_slot(id);
        let record = slot
            .get_or_init(|| async {
                let family = self
                    .parser
                    .parse(id, &text)
                    .await
                    .map_err(RecordFailure::Parse)?;
                family.validate().map_err(RecordFailure::Invalid)?;
                Ok::<_, RecordFailure>(Arc::new(family))
            })
            .await;
        match record {
            Ok(family) => Ok(Some(family.clone())),
            Err(RecordFailure::Parse(failure)) => Err(FamilyWebError::Parse(failure.clone())),
            Err(RecordFailure::Invalid(message)) => Err(FamilyWebError::InvalidFamily {
                message: message.clone(),
                family_id: id.to_string(),
            }),
        }
    }

    /// Every family id of the register in printed order, listed once.
    pub async fn family_ids(&self) -> Result<Arc<Vec<FamilyId>>> {
        let ids = self
            .ids
            .get_or_try_init(|| async {
                let ids = self.source.list_family_ids().await?;
                Ok::<_, FamilyWebError>(Arc::new(ids))
            })
            .await?;
        Ok(ids.clone())
    }

    /// Ids of all families whose raw text contains `birth_date` verbatim,
    /// in register order, skipping the ids in `exclude`.
    pub async fn search_birth_date(
        &self,
        birth_date: &str,
        exclude: &[&FamilyId],
    ) -> Result<Vec<FamilyId>> {
        let ids = self.family_ids().await?;
        let mut hits = Vec::new();
        for id in ids.iter() {
            if exclude.contains(&id) {
                continue;
            }
            if let Some(text) = self.raw_text(id).await? {
                if text_contains_date(&text, birth_date) {
                    hits.push(id.clone());
                }
            }
        }
        Ok(hits)
    }

    /// Drops the memoized text and record of `id` so the next request goes
    /// back to the collaborators.
    pub fn forget(&self, id: &FamilyId) {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}
