//! Error types for the latency proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Main error type for proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Forwarding to the upstream failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Inbound request body could not be read.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// URL could not be rewritten to point at the proxy.
    #[error("cannot proxy url {0}")]
    Rewrite(String),

    /// Server task failed.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Forwarding errors surface to the caller as `502 Bad Gateway`.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!("Proxy error: {}", self);
        let status = match &self {
            ProxyError::Body(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
