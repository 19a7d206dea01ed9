//! Error types for database operations.

use bench_types::TypesError;
use thiserror::Error;

/// Errors returned by [`Database`](crate::Database) implementations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Document does not exist (or is deleted).
    #[error("document not found: {id}")]
    NotFound {
        /// The missing document id.
        id: String,
    },

    /// Write used a stale or missing revision.
    #[error("document update conflict: {id}")]
    Conflict {
        /// The conflicting document id.
        id: String,
    },

    /// Database does not exist.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// The database name.
        name: String,
    },

    /// Server answered with an unexpected status.
    #[error("unexpected status {status}: {reason}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        reason: String,
    },

    /// Connection to the server failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Document failed validation.
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] TypesError),

    /// Database URL is not usable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for DbError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            DbError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            DbError::Http(format!("decode: {}", e))
        } else {
            DbError::Http(e.to_string())
        }
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
