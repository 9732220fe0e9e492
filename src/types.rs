use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Clan name followed by a numeral, optionally with a one-letter suffix
/// (`Hyyppä 5`, `Iso-Korpi 12b`). The word before the clan, if any, is
/// captured separately: it is either the first half of a two-word clan or
/// unrelated text such as `ks` or `kotoisin`.
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(\p{L}[\p{L}'\-]*)[ \t]+)?(\p{L}[\p{L}'\-]*)\s+(\d+[a-zA-Z]?)\b")
        .expect("reference pattern is valid")
});

/// Normalizes a family identifier for use as a key: whitespace collapsed,
/// trimmed and uppercased.
pub fn normalize_family_id(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Identifier of a family entry in the register, e.g. `KORPI 6`.
///
/// Always held in normalized form, so two ids compare equal regardless of the
/// case or spacing they were written with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FamilyId(String);

impl FamilyId {
    pub fn new(raw: &str) -> Self {
        Self(normalize_family_id(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the first `Clan N` identifier found in a free-text reference,
    /// taking the clan as the single (possibly hyphenated) word before the
    /// numeral.
    pub fn parse_reference(text: &str) -> Option<FamilyId> {
        match Reference::parse(text) {
            Reference::Explicit(id) | Reference::Qualified { short: id, .. } => Some(id),
            Reference::Unlabelled => None,
        }
    }

    /// The clan part of the identifier (`KORPI` for `KORPI 6`).
    pub fn clan(&self) -> &str {
        self.0
            .rsplit_once(' ')
            .map(|(clan, _)| clan)
            .unwrap_or(&self.0)
    }
}

impl From<String> for FamilyId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for FamilyId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<FamilyId> for String {
    fn from(id: FamilyId) -> Self {
        id.0
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A textual cross-reference carried by a person record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// The reference names a family explicitly.
    Explicit(FamilyId),
    /// A word precedes the clan name. `long` reads it as part of a two-word
    /// clan, `short` ignores it; only the register can tell which is meant.
    Qualified { long: FamilyId, short: FamilyId },
    /// A reference marker is present but names no usable family id; only a
    /// corpus-wide search can resolve it.
    Unlabelled,
}

impl Reference {
    /// Reads a non-blank reference field.
    pub fn parse(text: &str) -> Reference {
        let Some(caps) = REFERENCE_RE.captures(text) else {
            return Reference::Unlabelled;
        };
        let short = FamilyId::new(&format!("{} {}", &caps[2], &caps[3]));
        match caps.get(1) {
            Some(prefix) => Reference::Qualified {
                long: FamilyId::new(&format!("{} {}", prefix.as_str(), short.as_str())),
                short,
            },
            None => Reference::Explicit(short),
        }
    }

    fn from_field(field: Option<&String>) -> Option<Reference> {
        let raw = field?;
        if raw.trim().is_empty() {
            return None;
        }
        Some(Self::parse(raw))
    }
}

/// One person line of a family entry.
///
/// Dates are kept verbatim as printed (`09.10.1726`, `-63`). The `spouse_*`
/// fields are enhancement fields filled in after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patronymic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marriage_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse: Option<String>,
    /// Reference to the family this person was born into ("as child").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_ref: Option<String>,
    /// Reference to the family this person heads after marriage ("as parent").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse_birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse_origin_family: Option<FamilyId>,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn origin_reference(&self) -> Option<Reference> {
        Reference::from_field(self.origin_ref.as_ref())
    }

    pub fn result_reference(&self) -> Option<Reference> {
        Reference::from_field(self.result_ref.as_ref())
    }

    /// A child counts as married when any marriage evidence is printed.
    pub fn is_married(&self) -> bool {
        self.result_ref.is_some() || self.spouse.is_some() || self.marriage_date.is_some()
    }
}

/// Which parent line of a couple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentSlot {
    Husband,
    Wife,
}

impl ParentSlot {
    pub fn other(self) -> ParentSlot {
        match self {
            ParentSlot::Husband => ParentSlot::Wife,
            ParentSlot::Wife => ParentSlot::Husband,
        }
    }
}

/// Structural position of a person line inside a family entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordPosition {
    Parent { couple: usize, slot: ParentSlot },
    Child { couple: usize, index: usize },
}

impl RecordPosition {
    pub fn is_parent(&self) -> bool {
        matches!(self, RecordPosition::Parent { .. })
    }
}

/// One marriage within a family entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Couple {
    #[serde(default)]
    pub husband: Option<Person>,
    #[serde(default)]
    pub wife: Option<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marriage_date: Option<String>,
    #[serde(default)]
    pub children: Vec<Person>,
    #[serde(default)]
    pub children_died_infancy: u32,
}

impl Couple {
    pub fn parent(&self, slot: ParentSlot) -> Option<&Person> {
        match slot {
            ParentSlot::Husband => self.husband.as_ref(),
            ParentSlot::Wife => self.wife.as_ref(),
        }
    }

    pub fn parent_mut(&mut self, slot: ParentSlot) -> Option<&mut Person> {
        match slot {
            ParentSlot::Husband => self.husband.as_mut(),
            ParentSlot::Wife => self.wife.as_mut(),
        }
    }
}

/// A printed family entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    #[serde(default)]
    pub pages: Vec<String>,
    pub couples: Vec<Couple>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Family {
    pub fn new(id: impl Into<FamilyId>) -> Self {
        Self {
            id: id.into(),
            pages: Vec::new(),
            couples: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Checks the structural invariants of a family record: a non-empty id, at
    /// least one couple, and no repeated child name within a couple.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("family id is empty".to_string());
        }
        if self.couples.is_empty() {
            return Err("family has no couples".to_string());
        }
        for (i, couple) in self.couples.iter().enumerate() {
            let mut seen = std::collections::HashSet::new();
            for child in &couple.children {
                if !seen.insert(child.name.trim().to_lowercase()) {
                    return Err(format!(
                        "couple {} lists child '{}' more than once",
                        i + 1,
                        child.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every person line in reading order: each couple's parents, then its
    /// children.
    pub fn records(&self) -> Vec<(RecordPosition, &Person)> {
        let mut out = Vec::new();
        for (ci, couple) in self.couples.iter().enumerate() {
            for slot in [ParentSlot::Husband, ParentSlot::Wife] {
                if let Some(p) = couple.parent(slot) {
                    out.push((RecordPosition::Parent { couple: ci, slot }, p));
                }
            }
            for (index, child) in couple.children.iter().enumerate() {
                out.push((RecordPosition::Child { couple: ci, index }, child));
            }
        }
        out
    }

    pub fn person_at(&self, pos: RecordPosition) -> Option<&Person> {
        match pos {
            RecordPosition::Parent { couple, slot } => self.couples.get(couple)?.parent(slot),
            RecordPosition::Child { couple, index } => {
                self.couples.get(couple)?.children.get(index)
            }
        }
    }

    pub fn person_at_mut(&mut self, pos: RecordPosition) -> Option<&mut Person> {
        match pos {
            RecordPosition::Parent { couple, slot } => {
                self.couples.get_mut(couple)?.parent_mut(slot)
            }
            RecordPosition::Child { couple, index } => {
                self.couples.get_mut(couple)?.children.get_mut(index)
            }
        }
    }

    /// Marriage date printed for the person at `pos`: the couple's date for a
    /// parent line, the child's own date for a child line.
    pub fn marriage_date_at(&self, pos: RecordPosition) -> Option<&str> {
        match pos {
            RecordPosition::Parent { couple, .. } => {
                self.couples.get(couple)?.marriage_date.as_deref()
            }
            RecordPosition::Child { .. } => self.person_at(pos)?.marriage_date.as_deref(),
        }
    }

    /// Spouse name printed for the person at `pos`: the other parent of the
    /// couple for a parent line, the child's spouse field for a child line.
    pub fn spouse_name_at(&self, pos: RecordPosition) -> Option<&str> {
        match pos {
            RecordPosition::Parent { couple, slot } => self
                .couples
                .get(couple)?
                .parent(slot.other())
                .map(|p| p.name.as_str()),
            RecordPosition::Child { .. } => self.person_at(pos)?.spouse.as_deref(),
        }
    }
}

/// Kinds of cross-reference a match is attempted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchRole {
    OriginOfParent,
    OriginOfSpouse,
    ResultOfMarriedChild,
}

impl MatchRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRole::OriginOfParent => "origin_of_parent",
            MatchRole::OriginOfSpouse => "origin_of_spouse",
            MatchRole::ResultOfMarriedChild => "result_of_married_child",
        }
    }

    /// Whether the person is conventionally printed on a parent line of the
    /// target family (resulting family) rather than a child line (origin).
    pub fn expects_parent_line(&self) -> bool {
        matches!(self, MatchRole::ResultOfMarriedChild)
    }
}

impl fmt::Display for MatchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of the reference matcher on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Confirmed,
    Rejected,
    Ambiguous,
}

/// States of a network assembly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyState {
    Pending,
    ResolvingParents,
    ResolvingChildren,
    ResolvingSpouses,
    Complete,
    PartiallyComplete,
}

impl AssemblyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyState::Pending => "pending",
            AssemblyState::ResolvingParents => "resolving_parents",
            AssemblyState::ResolvingChildren => "resolving_children",
            AssemblyState::ResolvingSpouses => "resolving_spouses",
            AssemblyState::Complete => "complete",
            AssemblyState::PartiallyComplete => "partially_complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssemblyState::Complete | AssemblyState::PartiallyComplete
        )
    }
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A main family together with the families its references resolved to.
///
/// Every key is the id of a family reached through a reference printed in the
/// main family or in one of the families already included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyNetwork {
    pub main: Family,
    #[serde(default)]
    pub parent_origins: BTreeMap<FamilyId, Family>,
    #[serde(default)]
    pub child_results: BTreeMap<FamilyId, Family>,
    #[serde(default)]
    pub spouse_origins: BTreeMap<FamilyId, Family>,
}

impl FamilyNetwork {
    pub fn new(main: Family) -> Self {
        Self {
            main,
            parent_origins: BTreeMap::new(),
            child_results: BTreeMap::new(),
            spouse_origins: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &FamilyId {
        &self.main.id
    }

    /// Number of families in the web, main family included.
    pub fn family_count(&self) -> usize {
        1 + self.parent_origins.len() + self.child_results.len() + self.spouse_origins.len()
    }

    pub fn contains(&self, id: &FamilyId) -> bool {
        &self.main.id == id
            || self.parent_origins.contains_key(id)
            || self.child_results.contains_key(id)
            || self.spouse_origins.contains_key(id)
    }
}

/// Why a reference was left out of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Unresolved,
    ParseFailure,
    Source,
}

/// A reference that could not be resolved during assembly, kept so callers
/// can flag the person for manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub person: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    pub role: MatchRole,
    /// Family the person's line was read from.
    pub home_family: FamilyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
}

/// Output of one assembly run.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledNetwork {
    pub network: FamilyNetwork,
    pub state: AssemblyState,
    pub unresolved: Vec<UnresolvedEntry>,
}

/// A cached, completed network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNetworkEntry {
    pub network: Arc<FamilyNetwork>,
    pub created_at: DateTime<Utc>,
    /// Time spent resolving the network, in milliseconds.
    pub resolution_ms: u64,
    pub state: AssemblyState,
    #[serde(default)]
    pub unresolved: Vec<UnresolvedEntry>,
    /// SHA-256 of the main family's raw text when it was assembled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
}

impl CachedNetworkEntry {
    pub fn id(&self) -> &FamilyId {
        self.network.id()
    }

    pub fn needs_review(&self) -> bool {
        self.state == AssemblyState::PartiallyComplete
    }
}

/// Aggregate statistics over the network cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub partial_count: usize,
    pub total_resolution_ms: u64,
    pub mean_resolution_ms: u64,
}
