//! Collaborators consumed by the resolver: where raw family text comes from
//! and how it becomes a structured `Family`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::errors::{FamilyWebError, ParseFailure, Result};
use crate::types::{Family, FamilyId};

/// Access to the raw printed text of the register.
#[async_trait]
pub trait TextSource: Send + Sync {
    /// The raw text block of a family, or `None` when the id is not in the
    /// register.
    async fn extract_raw_text(&self, id: &FamilyId) -> Result<Option<String>>;

    /// Every family id of the register, in printed order.
    async fn list_family_ids(&self) -> Result<Vec<FamilyId>>;
}

/// Turns a raw text block into a structured family record.
#[async_trait]
pub trait RecordParser: Send + Sync {
    async fn parse(&self, id: &FamilyId, raw_text: &str)
        -> std::result::Result<Family, ParseFailure>;
}

/// Parses raw text that already holds a JSON-encoded `Family`, as produced by
/// an upstream extraction step.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordParser;

#[async_trait]
impl RecordParser for JsonRecordParser {
    async fn parse(
        &self,
        id: &FamilyId,
        raw_text: &str,
    ) -> std::result::Result<Family, ParseFailure> {
        let family: Family = serde_json::from_str(raw_text)
            .map_err(|e| ParseFailure::new(id.as_str(), format!("malformed record: {e}")))?;
        if &family.id != id {
            return Err(ParseFailure::new(
                id.as_str(),
                format!("record is for {} instead", family.id),
            ));
        }
        Ok(family)
    }
}

/// An in-memory register of raw text blocks, kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct StaticRegister {
    order: Vec<FamilyId>,
    texts: HashMap<FamilyId, String>,
}

impl StaticRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the raw text of a family.
    pub fn insert_text(&mut self, id: impl Into<FamilyId>, text: impl Into<String>) {
        let id = id.into();
        if !self.texts.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.texts.insert(id, text.into());
    }

    /// Adds a structured family, stored as JSON text for `JsonRecordParser`.
    pub fn insert_family(&mut self, family: &Family) -> Result<()> {
        let text = serde_json::to_string(family)?;
        self.insert_text(family.id.clone(), text);
        Ok(())
    }

    pub fn from_families<'a>(families: impl IntoIterator<Item = &'a Family>) -> Result<Self> {
        let mut register = Self::new();
        for family in families {
            register.insert_family(family)?;
        }
        Ok(register)
    }

    /// Loads a JSON array of families from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            FamilyWebError::Source {
                message: format!("failed to read register '{}': {}", path.display(), e),
                family_id: None,
            }
        })?;
        let families: Vec<Family> = serde_json::from_str(&contents)?;
        Self::from_families(&families)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[async_trait]
impl TextSource for StaticRegister {
    async fn extract_raw_text(&self, id: &FamilyId) -> Result<Option<String>> {
        Ok(self.texts.get(id).cloned())
    }

    async fn list_family_ids(&self) -> Result<Vec<FamilyId>> {
        Ok(self.order.clone())
    }
}
