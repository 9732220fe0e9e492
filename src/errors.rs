use std::sync::Arc;

use thiserror::Error;

use crate::types::{MatchRole, Person};

/// Errors that can occur while building or caching family networks.
#[derive(Error, Debug)]
pub enum FamilyWebError {
    #[error("family not found in source: {family_id}")]
    FamilyNotFound { family_id: String },

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("invalid family record: {message} (family: {family_id})")]
    InvalidFamily { message: String, family_id: String },

    #[error("source error: {message} (family: {family_id:?})")]
    Source {
        message: String,
        family_id: Option<String>,
    },

    #[error("persistence error: {message} (operation: {operation})")]
    Persistence { message: String, operation: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error produced by an assembly another caller was already running.
    #[error("{0}")]
    Coalesced(Arc<FamilyWebError>),
}

/// Convenience alias for results using `FamilyWebError`.
pub type Result<T> = std::result::Result<T, FamilyWebError>;

/// The record parser could not turn a raw text block into a `Family`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse failure: {cause} (family: {family_id})")]
pub struct ParseFailure {
    pub family_id: String,
    pub cause: String,
}

impl ParseFailure {
    pub fn new(family_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            family_id: family_id.into(),
            cause: cause.into(),
        }
    }
}

/// Failure to resolve a single cross-reference.
///
/// Never fatal to a network assembly: the assembler records it and carries on.
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("unresolved {role} reference for {}: {reason}", .person.name)]
    UnresolvedReference {
        person: Box<Person>,
        role: MatchRole,
        reason: String,
    },

    #[error(transparent)]
    ParseFailure(#[from] ParseFailure),

    #[error("source error while resolving: {message}")]
    Source { message: String },
}

impl ResolutionError {
    pub fn unresolved(person: &Person, role: MatchRole, reason: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            person: Box::new(person.clone()),
            role,
            reason: reason.into(),
        }
    }
}

impl From<FamilyWebError> for ResolutionError {
    fn from(err: FamilyWebError) -> Self {
        match err {
            FamilyWebError::Parse(failure) => Self::ParseFailure(failure),
            FamilyWebError::InvalidFamily { message, family_id } => {
                Self::ParseFailure(ParseFailure::new(family_id, message))
            }
            other => Self::Source {
                message: other.to_string(),
            },
        }
    }
}
