//! Error taxonomy shared by the store, the mapper, the adapters and the API.

use thiserror::Error;

/// Errors surfaced by every data-access operation.
///
/// An absent singleton (retention settings that were never saved) is not an
/// error: those reads return `Ok(None)`. `NotFound` is reserved for mutations
/// that target a specific document which does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrmError {
    /// Missing or malformed caller input (e.g. a blank owner id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store returned a document that does not map onto its record type.
    #[error("malformed record {collection}/{id}: {reason}")]
    MalformedRecord {
        collection: String,
        id: String,
        reason: String,
    },

    /// The store (or an ownership check) rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Transport or backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CrmError {
    /// Short machine-readable kind, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CrmError::InvalidArgument(_) => "invalid_argument",
            CrmError::MalformedRecord { .. } => "malformed_record",
            CrmError::PermissionDenied(_) => "permission_denied",
            CrmError::Unavailable(_) => "unavailable",
            CrmError::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, CrmError>;
