/// Reference resolution module.
///
/// Resolves the textual cross-references printed on a person line (origin
/// family, resulting family) into concrete family records, validating each
/// candidate against birth dates, spouse names and marriage years.
mod matcher;
mod resolver;

pub use matcher::{CandidateMatch, Evidence, ReferenceMatcher, Selection, Signals};
pub use resolver::{FamilyResolver, Resolved, ResolverOptions};
