use std::sync::Arc;

use crate::dates::{same_date, years_agree};
use crate::names::{given_name_key, NameEquivalenceStore};
use crate::types::*;

/// How a candidate family was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// The person's reference named the candidate explicitly.
    ExplicitReference,
    /// The candidate came out of a corpus-wide birth-date search.
    CorpusSearch,
}

/// Which signals held for the chosen record of a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub birth_date: bool,
    pub spouse_name: bool,
    pub marriage_year: bool,
}

impl Signals {
    /// Secondary confirmation: spouse name or marriage year.
    pub fn secondary(&self) -> bool {
        self.spouse_name || self.marriage_year
    }

    fn strength(&self) -> u8 {
        u8::from(self.spouse_name) + u8::from(self.marriage_year)
    }
}

/// The matcher's verdict on one candidate family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMatch {
    pub result: MatchResult,
    /// The person line the verdict is based on.
    pub position: Option<RecordPosition>,
    pub signals: Signals,
}

impl CandidateMatch {
    fn rejected() -> Self {
        Self {
            result: MatchResult::Rejected,
            position: None,
            signals: Signals::default(),
        }
    }
}

/// Outcome of choosing among several searched candidates.
#[derive(Debug, Clone)]
pub enum Selection {
    Confirmed {
        family: Arc<Family>,
        candidate: CandidateMatch,
    },
    /// More than one candidate fits and nothing decides between them, or the
    /// only fits lack secondary confirmation.
    Ambiguous { candidates: Vec<FamilyId> },
    NoMatch,
}

/// Decides whether a candidate family is the one a person's reference
/// points to.
///
/// Matching strategies, in priority order:
/// 1. **Birth date** -- a person line of the candidate carries the person's
///    birth date verbatim. Lines in the role's conventional position (child
///    line for an origin family, parent line for a resulting family) are
///    preferred, but either is accepted.
/// 2. **Secondary confirmation** -- the spouse's given name is equivalent, or
///    the marriage years agree (two-digit abbreviations compare by their last
///    two digits).
///
/// An explicitly referenced candidate is confirmed on the birth date alone
/// when the dated line carries an equivalent given name; a differently named
/// line needs secondary confirmation too. A searched candidate always needs
/// both.
pub struct ReferenceMatcher {
    names: Arc<NameEquivalenceStore>,
}

impl ReferenceMatcher {
    pub fn new(names: Arc<NameEquivalenceStore>) -> Self {
        Self { names }
    }

    /// Judges a single candidate.
    pub fn matches(
        &self,
        candidate: &Family,
        person: &Person,
        role: MatchRole,
        evidence: Evidence,
    ) -> CandidateMatch {
        let records = candidate.records();

        if let Some(birth) = person.birth_date.as_deref() {
            let hits: Vec<RecordPosition> = records
                .iter()
                .filter(|(_, p)| {
                    p.birth_date
                        .as_deref()
                        .is_some_and(|b| same_date(b, birth))
                })
                .map(|(pos, _)| *pos)
                .collect();

            let Some((position, signals, named)) =
                self.best_record(candidate, person, role, &hits)
            else {
                return CandidateMatch::rejected();
            };
            let signals = Signals {
                birth_date: true,
                ..signals
            };
            // A date shared by a differently named line (a sibling, a parent)
            // proves nothing without a spouse or marriage to back it.
            let result = match evidence {
                Evidence::ExplicitReference if named || signals.secondary() => {
                    MatchResult::Confirmed
                }
                Evidence::CorpusSearch if signals.secondary() => MatchResult::Confirmed,
                _ => MatchResult::Ambiguous,
            };
            return CandidateMatch {
                result,
                position: Some(position),
                signals,
            };
        }

        // No birth date printed for the person: only an explicit reference can
        // still be confirmed, by a same-named line with secondary confirmation.
        if evidence == Evidence::CorpusSearch {
            return CandidateMatch::rejected();
        }
        let named: Vec<RecordPosition> = records
            .iter()
            .filter(|(_, p)| self.names.are_equivalent(&p.name, &person.name))
            .map(|(pos, _)| *pos)
            .collect();
        match self.best_record(candidate, person, role, &named) {
            Some((position, signals, _)) => CandidateMatch {
                result: if signals.secondary() {
                    MatchResult::Confirmed
                } else {
                    MatchResult::Ambiguous
                },
                position: Some(position),
                signals,
            },
            None => CandidateMatch::rejected(),
        }
    }

    /// Chooses among candidates found by a corpus search.
    ///
    /// A single confirmed candidate wins. Several confirmed candidates are
    /// narrowed to the ones with the most secondary signals; if that still
    /// leaves more than one, the result is ambiguous.
    pub fn select(&self, candidates: &[Arc<Family>], person: &Person, role: MatchRole) -> Selection {
        let verdicts: Vec<(usize, CandidateMatch)> = candidates
            .iter()
            .enumerate()
            .map(|(i, family)| (i, self.matches(family, person, role, Evidence::CorpusSearch)))
            .filter(|(_, m)| m.result != MatchResult::Rejected)
            .collect();

        let confirmed: Vec<&(usize, CandidateMatch)> = verdicts
            .iter()
            .filter(|(_, m)| m.result == MatchResult::Confirmed)
            .collect();

        if confirmed.is_empty() {
            if verdicts.is_empty() {
                return Selection::NoMatch;
            }
            return Selection::Ambiguous {
                candidates: verdicts
                    .iter()
                    .map(|(i, _)| candidates[*i].id.clone())
                    .collect(),
            };
        }

        let top = confirmed
            .iter()
            .map(|(_, m)| m.signals.strength())
            .max()
            .unwrap_or(0);
        let strongest: Vec<&&(usize, CandidateMatch)> = confirmed
            .iter()
            .filter(|(_, m)| m.signals.strength() == top)
            .collect();

        match strongest.as_slice() {
            [(i, m)] => Selection::Confirmed {
                family: candidates[*i].clone(),
                candidate: m.clone(),
            },
            _ => Selection::Ambiguous {
                candidates: strongest
                    .iter()
                    .map(|(i, _)| candidates[*i].id.clone())
                    .collect(),
            },
        }
    }

    /// Name pairs that a confirmed match shows to be the same given name but
    /// that the store does not yet treat as equivalent: the person's own name
    /// against the matched line, and the printed spouse names.
    pub fn learnable_pairs(
        &self,
        candidate: &Family,
        person: &Person,
        position: RecordPosition,
    ) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(matched) = candidate.person_at(position) {
            self.push_if_new(&mut pairs, &person.name, &matched.name);
        }
        if let (Some(ours), Some(theirs)) =
            (person.spouse.as_deref(), candidate.spouse_name_at(position))
        {
            self.push_if_new(&mut pairs, ours, theirs);
        }
        pairs
    }

    fn push_if_new(&self, pairs: &mut Vec<(String, String)>, a: &str, b: &str) {
        if let (Some(ka), Some(kb)) = (given_name_key(a), given_name_key(b)) {
            if !self.names.are_equivalent(&ka, &kb) {
                pairs.push((ka, kb));
            }
        }
    }

    /// Scores the lines at `positions` and returns the best one with its
    /// secondary signals and whether its given name is equivalent to the
    /// person's. A same-named line always outranks a differently named one.
    /// Ties go to the earliest line in reading order.
    fn best_record(
        &self,
        candidate: &Family,
        person: &Person,
        role: MatchRole,
        positions: &[RecordPosition],
    ) -> Option<(RecordPosition, Signals, bool)> {
        let mut best: Option<(i32, RecordPosition, Signals, bool)> = None;
        for &pos in positions {
            let Some(record) = candidate.person_at(pos) else {
                continue;
            };
            let signals = self.secondary_signals(candidate, person, pos);
            let named = self.names.are_equivalent(&record.name, &person.name);
            let mut score = i32::from(signals.strength()) * 4;
            if pos.is_parent() == role.expects_parent_line() {
                score += 2;
            }
            if named {
                score += 16;
            }
            if best.as_ref().map_or(true, |(s, ..)| score > *s) {
                best = Some((score, pos, signals, named));
            }
        }
        best.map(|(_, pos, signals, named)| (pos, signals, named))
    }

    fn secondary_signals(&self, candidate: &Family, person: &Person, pos: RecordPosition) -> Signals {
        let spouse_name = match (person.spouse.as_deref(), candidate.spouse_name_at(pos)) {
            (Some(ours), Some(theirs)) => self.names.are_equivalent(ours, theirs),
            _ => false,
        };
        let marriage_year = match (person.marriage_date.as_deref(), candidate.marriage_date_at(pos)) {
            (Some(ours), Some(theirs)) => years_agree(ours, theirs),
            _ => false,
        };
        Signals {
            birth_date: false,
            spouse_name,
            marriage_year,
        }
    }
}
