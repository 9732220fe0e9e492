use std::sync::Arc;

use crate::corpus::Corpus;
use crate::dates::normalize_date;
use crate::diagnostics::{Diagnostic, SharedSink};
use crate::errors::ResolutionError;
use crate::names::NameEquivalenceStore;
use crate::types::*;

use super::matcher::{CandidateMatch, Evidence, ReferenceMatcher, Selection, Signals};

/// Tunables of the resolver.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Fall back to a corpus-wide birth-date search once when an explicit
    /// reference points nowhere or fails the birth-date check.
    pub fallback_search_on_mismatch: bool,
    /// Merge name pairs that a corroborated match shows to be equivalent.
    pub learn_names: bool,
    /// A search hitting more candidates than this is reported as ambiguous
    /// without parsing any of them.
    pub max_search_candidates: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            fallback_search_on_mismatch: true,
            learn_names: true,
            max_search_candidates: 25,
        }
    }
}

/// A reference resolved to a family.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub family: Arc<Family>,
    /// The line of `family` the person was matched to.
    pub position: RecordPosition,
    pub signals: Signals,
    pub via_search: bool,
}

impl Resolved {
    /// The person line the reference was matched to.
    pub fn matched(&self) -> Option<&Person> {
        self.family.person_at(self.position)
    }

    /// The spouse of the matched line: the other parent of the couple when the
    /// match is a parent line.
    pub fn spouse(&self) -> Option<&Person> {
        match self.position {
            RecordPosition::Parent { couple, slot } => {
                self.family.couples.get(couple)?.parent(slot.other())
            }
            RecordPosition::Child { .. } => None,
        }
    }
}

/// Resolves the textual cross-references of a person to family records.
///
/// Each lookup returns `Ok(None)` when there is nothing to resolve (no
/// reference marker, or a search that found no candidate at all), and an
/// error when a reference exists but no single family can be confirmed.
pub struct FamilyResolver {
    corpus: Arc<Corpus>,
    matcher: ReferenceMatcher,
    names: Arc<NameEquivalenceStore>,
    sink: SharedSink,
    options: ResolverOptions,
}

impl FamilyResolver {
    pub fn new(
        corpus: Arc<Corpus>,
        names: Arc<NameEquivalenceStore>,
        sink: SharedSink,
        options: ResolverOptions,
    ) -> Self {
        Self {
            corpus,
            matcher: ReferenceMatcher::new(names.clone()),
            names,
            sink,
            options,
        }
    }

    /// The family a parent of `home` was born into.
    pub async fn resolve_origin(
        &self,
        person: &Person,
        home: &FamilyId,
    ) -> Result<Option<Resolved>, ResolutionError> {
        self.resolve(person, person.origin_reference(), MatchRole::OriginOfParent, home)
            .await
    }

    /// The family a married child of `home` heads.
    pub async fn resolve_result(
        &self,
        child: &Person,
        home: &FamilyId,
    ) -> Result<Option<Resolved>, ResolutionError> {
        self.resolve(
            child,
            child.result_reference(),
            MatchRole::ResultOfMarriedChild,
            home,
        )
        .await
    }

    /// The family the spouse of a married child was born into, found through
    /// the spouse's line in the child's resulting family.
    pub async fn resolve_spouse_origin(
        &self,
        resulting: &Resolved,
    ) -> Result<Option<Resolved>, ResolutionError> {
        let Some(spouse) = resulting.spouse() else {
            return Ok(None);
        };
        let spouse = spouse_in_context(resulting, spouse);
        self.resolve(
            &spouse,
            spouse.origin_reference(),
            MatchRole::OriginOfSpouse,
            &resulting.family.id,
        )
        .await
    }

    async fn resolve(
        &self,
        person: &Person,
        reference: Option<Reference>,
        role: MatchRole,
        home: &FamilyId,
    ) -> Result<Option<Resolved>, ResolutionError> {
        let Some(reference) = reference else {
            return Ok(None);
        };

        let id = match reference {
            Reference::Unlabelled => return self.search(person, role, &[home]).await,
            Reference::Explicit(id) => id,
            Reference::Qualified { long, short } => {
                if self.corpus.family_ids().await?.contains(&long) {
                    long
                } else {
                    short
                }
            }
        };

        // A reference back to the family the person was read from is a
        // misprint; it is handled like a reference that fails validation.
        let target = if &id == home {
            None
        } else {
            self.corpus.family(&id).await?
        };
        if let Some(family) = target {
            let verdict = self
                .matcher
                .matches(&family, person, role, Evidence::ExplicitReference);
            match verdict.result {
                MatchResult::Confirmed => {
                    return Ok(Some(self.accept(person, role, family, verdict, false)));
                }
                MatchResult::Ambiguous => {
                    return Err(ResolutionError::unresolved(
                        person,
                        role,
                        format!("{id} names the person but nothing confirms the match"),
                    ));
                }
                MatchResult::Rejected => {
                    self.sink.emit(Diagnostic::ExplicitReferenceRejected {
                        person: person.name.clone(),
                        role,
                        target: id.clone(),
                    });
                }
            }
        }

        if !self.options.fallback_search_on_mismatch {
            return Err(ResolutionError::unresolved(
                person,
                role,
                format!("{id} does not contain a matching line"),
            ));
        }
        match self.search(person, role, &[home, &id]).await? {
            Some(resolved) => Ok(Some(resolved)),
            None => Err(ResolutionError::unresolved(
                person,
                role,
                format!("{id} does not contain a matching line and no other family does"),
            )),
        }
    }

    /// Corpus-wide birth-date search. `Ok(None)` means no family carries the
    /// birth date at all.
    async fn search(
        &self,
        person: &Person,
        role: MatchRole,
        exclude: &[&FamilyId],
    ) -> Result<Option<Resolved>, ResolutionError> {
        let Some(birth) = person.birth_date.as_deref().and_then(normalize_date) else {
            return Err(ResolutionError::unresolved(
                person,
                role,
                "no explicit family id and no birth date to search by",
            ));
        };

        let ids = self.corpus.search_birth_date(&birth, exclude).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        if ids.len() > self.options.max_search_candidates {
            return Err(ResolutionError::unresolved(
                person,
                role,
                format!("{} families carry birth date {birth}", ids.len()),
            ));
        }

        let mut candidates = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.corpus.family(id).await {
                Ok(Some(family)) => candidates.push(family),
                Ok(None) => {}
                Err(e) => self.sink.emit(Diagnostic::CandidateSkipped {
                    family_id: id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        match self.matcher.select(&candidates, person, role) {
            Selection::Confirmed { family, candidate } => {
                Ok(Some(self.accept(person, role, family, candidate, true)))
            }
            Selection::Ambiguous { candidates } => {
                let listed: Vec<&str> = candidates.iter().map(FamilyId::as_str).collect();
                Err(ResolutionError::unresolved(
                    person,
                    role,
                    format!(
                        "birth date {birth} fits {} without a deciding spouse name or marriage year",
                        listed.join(", ")
                    ),
                ))
            }
            Selection::NoMatch => Ok(None),
        }
    }

    fn accept(
        &self,
        person: &Person,
        role: MatchRole,
        family: Arc<Family>,
        verdict: CandidateMatch,
        via_search: bool,
    ) -> Resolved {
        let position = verdict
            .position
            .unwrap_or(RecordPosition::Parent {
                couple: 0,
                slot: ParentSlot::Husband,
            });

        // Only a match corroborated by both the birth date and the marriage
        // year is trusted to teach the store new name equivalences.
        if self.options.learn_names && verdict.signals.birth_date && verdict.signals.marriage_year {
            for (a, b) in self.matcher.learnable_pairs(&family, person, position) {
                if self.names.learn(&a, &b) {
                    self.sink.emit(Diagnostic::NameLearned { a, b });
                }
            }
        }

        self.sink.emit(Diagnostic::ReferenceResolved {
            person: person.name.clone(),
            role,
            target: family.id.clone(),
            via_search,
        });

        Resolved {
            family,
            position,
            signals: verdict.signals,
            via_search,
        }
    }
}

/// The spouse's line as read from the resulting family, with the spouse and
/// marriage fields the couple implies filled in for matching.
fn spouse_in_context(resulting: &Resolved, spouse: &Person) -> Person {
    let mut spouse = spouse.clone();
    if spouse.spouse.is_none() {
        spouse.spouse = resulting.matched().map(|p| p.name.clone());
    }
    if spouse.marriage_date.is_none() {
        if let RecordPosition::Parent { couple, .. } = resulting.position {
            spouse.marriage_date = resulting
                .family
                .couples
                .get(couple)
                .and_then(|c| c.marriage_date.clone());
        }
    }
    spouse
}
