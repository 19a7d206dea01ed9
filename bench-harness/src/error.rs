//! Error types for the harness.

use bench_client::{DbError, ReplicationError};
use bench_proxy::ProxyError;
use std::time::Duration;
use thiserror::Error;

/// Errors that fail a benchmark case.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// The latency proxy failed.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// A replication run failed.
    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),

    /// Fixture construction failed.
    #[error("fixture error: {0}")]
    Fixture(String),

    /// An iteration finished with an unexpected result.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// An iteration did not finish in time.
    #[error("{case} iteration {iteration} timed out after {after:?}")]
    Timeout {
        /// Case name.
        case: String,
        /// Iteration index.
        iteration: usize,
        /// Timeout that expired.
        after: Duration,
    },

    /// A case was configured or driven incorrectly.
    #[error("invalid case: {0}")]
    InvalidCase(String),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
