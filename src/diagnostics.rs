//! Diagnostic events emitted by the resolver, assembler and cache.
//!
//! Components receive an `Arc<dyn DiagnosticSink>` instead of logging through
//! a process-wide logger, so a test can install a `RecordingSink` and assert
//! on exactly what a single component reported.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::types::{AssemblyState, FailureKind, FamilyId, MatchRole};

/// Where a cache hit was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Persistence,
}

/// A structured diagnostic event.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    StateChanged {
        family_id: FamilyId,
        from: AssemblyState,
        to: AssemblyState,
    },
    ReferenceResolved {
        person: String,
        role: MatchRole,
        target: FamilyId,
        via_search: bool,
    },
    ReferenceUnresolved {
        person: String,
        role: MatchRole,
        kind: FailureKind,
        reason: String,
    },
    CandidateSkipped {
        family_id: FamilyId,
        reason: String,
    },
    ExplicitReferenceRejected {
        person: String,
        role: MatchRole,
        target: FamilyId,
    },
    NameLearned {
        a: String,
        b: String,
    },
    CacheHit {
        family_id: FamilyId,
        tier: CacheTier,
    },
    CacheStored {
        family_id: FamilyId,
        resolution_ms: u64,
    },
    CacheDeleted {
        family_id: FamilyId,
    },
    CacheCleared,
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: Diagnostic);
}

/// Shared sink handle passed to each component.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: Diagnostic) {
        match event {
            Diagnostic::StateChanged { family_id, from, to } => {
                debug!(family = %family_id, %from, %to, "assembly state changed");
            }
            Diagnostic::ReferenceResolved {
                person,
                role,
                target,
                via_search,
            } => {
                debug!(%person, %role, target = %target, via_search, "reference resolved");
            }
            Diagnostic::ReferenceUnresolved {
                person,
                role,
                kind,
                reason,
            } => match kind {
                FailureKind::Unresolved => {
                    info!(%person, %role, %reason, "reference left unresolved");
                }
                FailureKind::ParseFailure | FailureKind::Source => {
                    warn!(%person, %role, ?kind, %reason, "reference failed");
                }
            },
            Diagnostic::CandidateSkipped { family_id, reason } => {
                debug!(family = %family_id, %reason, "candidate skipped");
            }
            Diagnostic::ExplicitReferenceRejected {
                person,
                role,
                target,
            } => {
                info!(%person, %role, target = %target, "explicit reference failed birth-date check");
            }
            Diagnostic::NameLearned { a, b } => {
                info!(%a, %b, "learned name equivalence");
            }
            Diagnostic::CacheHit { family_id, tier } => {
                debug!(family = %family_id, ?tier, "network cache hit");
            }
            Diagnostic::CacheStored {
                family_id,
                resolution_ms,
            } => {
                info!(family = %family_id, resolution_ms, "network cached");
            }
            Diagnostic::CacheDeleted { family_id } => {
                debug!(family = %family_id, "network cache entry deleted");
            }
            Diagnostic::CacheCleared => {
                info!("network cache cleared");
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of recorded events for which `pred` holds.
    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, event: Diagnostic) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// The default sink: forward to `tracing`.
pub fn tracing_sink() -> SharedSink {
    Arc::new(TracingSink)
}
