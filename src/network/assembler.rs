use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::dates::{year_of, Year};
use crate::diagnostics::{Diagnostic, SharedSink};
use crate::errors::ResolutionError;
use crate::resolution::{FamilyResolver, Resolved};
use crate::types::*;

/// Whether `from -> to` is a legal step of an assembly run.
pub fn can_transition(from: AssemblyState, to: AssemblyState) -> bool {
    use AssemblyState::*;
    matches!(
        (from, to),
        (Pending, ResolvingParents)
            | (ResolvingParents, ResolvingChildren)
            | (ResolvingChildren, ResolvingSpouses)
            | (ResolvingSpouses, Complete)
            | (ResolvingSpouses, PartiallyComplete)
    )
}

/// Working state of one assembly run. Owned by a single task; nothing else
/// sees the network until the run reaches a terminal state.
struct Run {
    state: AssemblyState,
    network: FamilyNetwork,
    unresolved: Vec<UnresolvedEntry>,
}

/// Builds the family web around one nuclear family.
///
/// Stages run in order (parents' origins, married children's resulting
/// families, those children's spouses' origins). Lookups within a stage are
/// independent and run concurrently; a stage fully settles before the next
/// starts, since later stages read the enhancements earlier ones wrote.
pub struct NetworkAssembler {
    resolver: Arc<FamilyResolver>,
    sink: SharedSink,
    parallelism: usize,
}

impl NetworkAssembler {
    pub fn new(resolver: Arc<FamilyResolver>, sink: SharedSink, parallelism: usize) -> Self {
        Self {
            resolver,
            sink,
            parallelism: parallelism.max(1),
        }
    }

    /// Runs a full assembly. Unresolvable references never fail the run;
    /// they are listed in the result and the run ends `PartiallyComplete`.
    pub async fn assemble(&self, main: Family) -> AssembledNetwork {
        let mut run = Run {
            state: AssemblyState::Pending,
            network: FamilyNetwork::new(main),
            unresolved: Vec::new(),
        };

        self.transition(&mut run, AssemblyState::ResolvingParents);
        self.resolve_parents(&mut run).await;

        self.transition(&mut run, AssemblyState::ResolvingChildren);
        let results = self.resolve_children(&mut run).await;

        self.transition(&mut run, AssemblyState::ResolvingSpouses);
        self.resolve_spouses(&mut run, results).await;

        let terminal = if run.unresolved.is_empty() {
            AssemblyState::Complete
        } else {
            AssemblyState::PartiallyComplete
        };
        self.transition(&mut run, terminal);

        AssembledNetwork {
            network: run.network,
            state: run.state,
            unresolved: run.unresolved,
        }
    }

    fn transition(&self, run: &mut Run, to: AssemblyState) {
        debug_assert!(
            can_transition(run.state, to),
            "illegal assembly transition {} -> {}",
            run.state,
            to
        );
        self.sink.emit(Diagnostic::StateChanged {
            family_id: run.network.main.id.clone(),
            from: run.state,
            to,
        });
        run.state = to;
    }

    async fn resolve_parents(&self, run: &mut Run) {
        let main = &run.network.main;
        let home = main.id.clone();
        let jobs: Vec<(RecordPosition, Person)> = main
            .records()
            .into_iter()
            .filter(|(pos, _)| pos.is_parent())
            .map(|(pos, _)| (pos, parent_in_context(main, pos)))
            .collect();

        let settled: Vec<_> = stream::iter(jobs)
            .map(|(pos, person)| {
                let resolver = Arc::clone(&self.resolver);
                let home = home.clone();
                async move {
                    let outcome = resolver.resolve_origin(&person, &home).await;
                    (pos, person, outcome)
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        for (_, person, outcome) in settled {
            match outcome {
                Ok(Some(resolved)) => {
                    self.include(run, &resolved, MatchRole::OriginOfParent);
                }
                Ok(None) => {}
                Err(err) => self.record_failure(
                    run,
                    &person,
                    MatchRole::OriginOfParent,
                    &home,
                    person.origin_ref.clone(),
                    &err,
                ),
            }
        }
    }

    /// Resolves every married child's resulting family and returns the hits,
    /// keyed by the child's position in the main family.
    async fn resolve_children(&self, run: &mut Run) -> Vec<(RecordPosition, Resolved)> {
        let main = &run.network.main;
        let home = main.id.clone();
        let jobs: Vec<(RecordPosition, Person)> = main
            .records()
            .into_iter()
            .filter(|(pos, p)| !pos.is_parent() && p.is_married())
            .map(|(pos, p)| (pos, p.clone()))
            .collect();

        let settled: Vec<_> = stream::iter(jobs)
            .map(|(pos, child)| {
                let resolver = Arc::clone(&self.resolver);
                let home = home.clone();
                async move {
                    let outcome = resolver.resolve_result(&child, &home).await;
                    (pos, child, outcome)
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        let mut found = Vec::new();
        for (pos, child, outcome) in settled {
            match outcome {
                Ok(Some(resolved)) => {
                    if self.include(run, &resolved, MatchRole::ResultOfMarriedChild) {
                        if let Some(target) = run.network.main.person_at_mut(pos) {
                            enhance_from_result(target, &resolved);
                        }
                        found.push((pos, resolved));
                    }
                }
                Ok(None) => {}
                Err(err) => self.record_failure(
                    run,
                    &child,
                    MatchRole::ResultOfMarriedChild,
                    &home,
                    child.result_ref.clone(),
                    &err,
                ),
            }
        }
        found
    }

    async fn resolve_spouses(&self, run: &mut Run, results: Vec<(RecordPosition, Resolved)>) {
        // The spouse's birth date is known as soon as the spouse's line is
        // found in the resulting family.
        for (pos, resolved) in &results {
            let birth = resolved.spouse().and_then(|s| s.birth_date.clone());
            if let Some(child) = run.network.main.person_at_mut(*pos) {
                if child.spouse_birth_date.is_none() {
                    child.spouse_birth_date = birth;
                }
            }
        }

        let settled: Vec<_> = stream::iter(results)
            .map(|(pos, resolved)| {
                let resolver = Arc::clone(&self.resolver);
                async move {
                    let outcome = resolver.resolve_spouse_origin(&resolved).await;
                    (pos, resolved, outcome)
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        for (pos, resolved, outcome) in settled {
            match outcome {
                Ok(Some(origin)) => {
                    if self.include(run, &origin, MatchRole::OriginOfSpouse) {
                        if let Some(child) = run.network.main.person_at_mut(pos) {
                            child.spouse_origin_family = Some(origin.family.id.clone());
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    if let Some(spouse) = resolved.spouse() {
                        self.record_failure(
                            run,
                            spouse,
                            MatchRole::OriginOfSpouse,
                            &resolved.family.id,
                            spouse.origin_ref.clone(),
                            &err,
                        );
                    }
                }
            }
        }
    }

    /// Adds a resolved family to the mapping for `role`. A reference leading
    /// back to the main family is dropped.
    fn include(&self, run: &mut Run, resolved: &Resolved, role: MatchRole) -> bool {
        let family = &resolved.family;
        if family.id == run.network.main.id {
            self.sink.emit(Diagnostic::CandidateSkipped {
                family_id: family.id.clone(),
                reason: format!("{role} reference leads back to the main family"),
            });
            return false;
        }
        let map = match role {
            MatchRole::OriginOfParent => &mut run.network.parent_origins,
            MatchRole::ResultOfMarriedChild => &mut run.network.child_results,
            MatchRole::OriginOfSpouse => &mut run.network.spouse_origins,
        };
        map.insert(family.id.clone(), family.as_ref().clone());
        true
    }

    fn record_failure(
        &self,
        run: &mut Run,
        person: &Person,
        role: MatchRole,
        home: &FamilyId,
        reference: Option<String>,
        err: &ResolutionError,
    ) {
        let (kind, reason) = match err {
            ResolutionError::UnresolvedReference { reason, .. } => {
                (FailureKind::Unresolved, reason.clone())
            }
            ResolutionError::ParseFailure(failure) => (FailureKind::ParseFailure, failure.to_string()),
            ResolutionError::Source { message } => (FailureKind::Source, message.clone()),
        };
        self.sink.emit(Diagnostic::ReferenceUnresolved {
            person: person.name.clone(),
            role,
            kind,
            reason: reason.clone(),
        });
        run.unresolved.push(UnresolvedEntry {
            person: person.name.clone(),
            birth_date: person.birth_date.clone(),
            role,
            home_family: home.clone(),
            reference,
            kind,
            reason,
        });
    }
}

/// A parent line with the spouse and marriage date its couple implies, so
/// the matcher can use them as secondary signals.
fn parent_in_context(family: &Family, pos: RecordPosition) -> Person {
    let mut person = family.person_at(pos).cloned().unwrap_or_default();
    if let RecordPosition::Parent { couple, slot } = pos {
        if let Some(couple) = family.couples.get(couple) {
            if person.spouse.is_none() {
                person.spouse = couple.parent(slot.other()).map(|p| p.name.clone());
            }
            if person.marriage_date.is_none() {
                person.marriage_date = couple.marriage_date.clone();
            }
        }
    }
    person
}

/// Copies what the resulting family knows about a married child onto the
/// child's line in the main family: death date, a full marriage date in place
/// of an abbreviated one, and the spouse's name.
fn enhance_from_result(child: &mut Person, resolved: &Resolved) {
    if let Some(matched) = resolved.matched() {
        if child.death_date.is_none() {
            child.death_date = matched.death_date.clone();
        }
    }

    if let RecordPosition::Parent { couple, .. } = resolved.position {
        let full = resolved
            .family
            .couples
            .get(couple)
            .and_then(|c| c.marriage_date.clone());
        let abbreviated = match child.marriage_date.as_deref() {
            None => true,
            Some(date) => !matches!(year_of(date), Some(Year::Full(_))),
        };
        if abbreviated && full.as_deref().and_then(year_of).is_some() {
            child.marriage_date = full;
        }
    }

    if child.spouse.is_none() {
        child.spouse = resolved.spouse().map(|s| s.name.clone());
    }
}
