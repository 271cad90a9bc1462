//! Errors surfaced by document lifecycle operations and id resolution

use thiserror::Error;

use crate::document::{DocBody, Document, DocumentError};
use crate::identity::IdError;
use crate::merge::MergeError;
use crate::storage::StoreError;

/// A candidate listed by an ambiguous QuickId
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousCandidate {
    /// Shortest prefix that tells this candidate apart from the others
    pub prefix: String,
    /// The document id
    pub id: String,
}

impl std::fmt::Display for AmbiguousCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.prefix, self.id)
    }
}

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The target id is held by another document
    #[error("Document '{id}' already exists")]
    DocExists {
        id: String,
        /// Body whose write was refused
        attempted: Box<DocBody>,
        /// Document currently holding the id
        existing: Box<Document>,
    },

    #[error("Failed to add document '{id}': {source}")]
    AddDoc {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to update document '{id}': {reason}")]
    UpdateDoc { id: String, reason: String },

    #[error("Failed to overwrite document '{id}': {reason}")]
    OverwriteDoc { id: String, reason: String },

    #[error("No document '{0}' to update")]
    NoDocToUpdate(String),

    #[error("No document '{0}' to overwrite")]
    NoDocToOverwrite(String),

    #[error("No document '{0}' to delete")]
    NoDocToDelete(String),

    #[error("Document '{id}' not found")]
    NotFound { id: String, deleted: bool },

    #[error("No document matches '{0}'")]
    NoQuickIdMatch(String),

    #[error("'{query}' is ambiguous: {}", list_candidates(.candidates))]
    AmbiguousQuickId {
        query: String,
        candidates: Vec<AmbiguousCandidate>,
    },
}

fn list_candidates(candidates: &[AmbiguousCandidate]) -> String {
    candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Whether the error means "no such document"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::NoDocToUpdate(_)
                | Error::NoDocToOverwrite(_)
                | Error::NoDocToDelete(_)
                | Error::NoQuickIdMatch(_)
        )
    }

    /// Whether retrying with fresh state could succeed
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::DocExists { .. } | Error::UpdateDoc { .. } | Error::OverwriteDoc { .. } => true,
            Error::AddDoc { source, .. } => source.is_conflict(),
            Error::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;
