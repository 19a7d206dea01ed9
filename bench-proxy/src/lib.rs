//! # bench-proxy
//!
//! Latency-injecting reverse proxy used by the docbench replication cases.
//!
//! Every inbound request is held for a fixed delay, then forwarded unchanged
//! to one upstream host; the upstream response is returned verbatim.
//!
//! ## Architecture
//!
//! ```text
//! replicator ──► 127.0.0.1:3001 ──(sleep latency)──► upstream CouchDB
//!            ◄──────────────── response verbatim ◄──
//! ```
//!
//! A [`ProxyServer`] owns the listening socket. Dropping it (or calling
//! [`ProxyServer::shutdown`]) stops the server, so each benchmark case can
//! create and release the proxy on the same fixed port.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod forward;
pub mod server;

pub use config::{ConfigError, ProxyConfig};
pub use error::ProxyError;
pub use server::ProxyServer;
