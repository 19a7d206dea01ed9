//! Error types for docbench document types.

use thiserror::Error;

/// Errors that can occur when parsing or validating document types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Revision string is not of the form `N-hash`
    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    /// Document is missing a required field
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// JSON conversion failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
