//! Configuration loading for the latency proxy.
//!
//! Configuration is loaded from a TOML file (default: `proxy.toml`) or built
//! in code by the benchmark cases.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (default: 127.0.0.1).
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Port to listen on (default: 3001). Port 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream server, e.g. `http://localhost:5984`. Request paths are kept.
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// Delay added before forwarding each request, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
    /// Largest request body accepted, in bytes (default: 64MB).
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

// Default value functions
fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_upstream() -> String {
    "http://localhost:5984".to_string()
}

fn default_body_limit() -> usize {
    64 * 1024 * 1024 // 64MB
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: default_port(),
            upstream: default_upstream(),
            latency_ms: 0,
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl ProxyConfig {
    /// Proxy to `upstream` with the given added latency, on the default port.
    pub fn new(upstream: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            upstream: upstream.into(),
            latency_ms,
            ..Self::default()
        }
    }

    /// Override the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The added latency as a [`Duration`].
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Parse and check the upstream URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not http(s).
    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.upstream).map_err(|e| ConfigError::InvalidUpstream {
            upstream: self.upstream.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUpstream {
                upstream: self.upstream.clone(),
                reason: "expected an http(s) URL with a host".into(),
            });
        }
        Ok(url)
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
    /// Upstream is not a usable URL.
    #[error("invalid upstream {upstream}: {reason}")]
    InvalidUpstream {
        /// The configured upstream.
        upstream: String,
        /// Why it was rejected.
        reason: String,
    },
}
