/// Assembly of a family web around one nuclear family.
///
/// Drives the resolver over every reference printed in the main family and
/// collects the resolved families into a `FamilyNetwork`.
mod assembler;

pub use assembler::{can_transition, NetworkAssembler};
