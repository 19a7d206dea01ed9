//! Harness configuration.
//!
//! Loaded from a TOML file (default: `docbench.toml`), then resolved against
//! the environment: `COUCH_HOST` overrides the configured server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable selecting the CouchDB server.
pub const COUCH_HOST_ENV: &str = "COUCH_HOST";

/// Server used when nothing else is configured.
pub const DEFAULT_COUCH_HOST: &str = "http://localhost:5984";

/// Where local (replication target) databases live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process databases.
    #[default]
    Memory,
    /// Databases on the configured CouchDB server.
    Couch,
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// CouchDB server holding the remote databases.
    #[serde(default = "default_couch_host")]
    pub couch_host: String,
    /// Port the latency proxy listens on (default: 3001).
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Limit for a single benchmark iteration in seconds.
    #[serde(default = "default_iteration_timeout")]
    pub iteration_timeout_secs: u64,
    /// Backend for local databases.
    #[serde(default)]
    pub local_backend: BackendKind,
}

// Default value functions
fn default_couch_host() -> String {
    DEFAULT_COUCH_HOST.to_string()
}

fn default_proxy_port() -> u16 {
    3001
}

fn default_request_timeout() -> u64 {
    60
}

fn default_iteration_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            couch_host: default_couch_host(),
            proxy_port: default_proxy_port(),
            request_timeout_secs: default_request_timeout(),
            iteration_timeout_secs: default_iteration_timeout(),
            local_backend: BackendKind::default(),
        }
    }
}

/// Resolve the CouchDB host from an environment value.
///
/// A trailing `/` is dropped so database URLs can be joined with one.
pub fn resolve_couch_host(env: Option<&str>) -> String {
    match env.map(str::trim) {
        Some(host) if !host.is_empty() => host.trim_end_matches('/').to_string(),
        _ => DEFAULT_COUCH_HOST.to_string(),
    }
}

impl HarnessConfig {
    /// Configuration pointing at `couch_host`, with defaults elsewhere.
    pub fn with_couch_host(couch_host: impl Into<String>) -> Self {
        Self {
            couch_host: couch_host.into(),
            ..Self::default()
        }
    }

    /// Apply `COUCH_HOST` from the process environment.
    pub fn resolve(self) -> Self {
        let env = std::env::var(COUCH_HOST_ENV).ok();
        self.resolve_with(env.as_deref())
    }

    /// Apply an explicit `COUCH_HOST` value; `None` keeps the configured host.
    pub fn resolve_with(mut self, couch_host: Option<&str>) -> Self {
        if couch_host.is_some() {
            self.couch_host = resolve_couch_host(couch_host);
        } else {
            self.couch_host = self.couch_host.trim_end_matches('/').to_string();
        }
        self
    }

    /// URL of database `name` on the configured server.
    pub fn remote_db_url(&self, name: &str) -> String {
        format!("{}/{}", self.couch_host.trim_end_matches('/'), name)
    }

    /// Per-request HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Limit for a single iteration.
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
