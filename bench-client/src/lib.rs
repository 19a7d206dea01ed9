//! # bench-client
//!
//! Database client library for the docbench replication benchmarks.
//!
//! ## Features
//!
//! - **Database Abstraction**: one async [`Database`] trait over the CouchDB
//!   document API (bulk writes, get/put, `_all_docs`, changes feed)
//! - **CouchDB over HTTP**: [`CouchDatabase`] talks to a real server
//! - **In-memory**: [`MemoryDatabase`] keeps CouchDB revision semantics in
//!   process, and [`MemoryCouchServer`] serves it over HTTP
//! - **Pull Replication**: [`replicate`] runs a one-shot replication and
//!   reports progress as [`ReplicationEvent`]s
//!
//! ## Example
//!
//! ```ignore
//! use bench_client::{replicate, CouchDatabase, CouchOptions, MemoryDatabase, ReplicationOptions};
//! use std::sync::Arc;
//!
//! let remote = Arc::new(CouchDatabase::new("http://localhost:5984", "bench", CouchOptions::default())?);
//! let local = Arc::new(MemoryDatabase::new("local"));
//!
//! let summary = replicate(remote, local, ReplicationOptions::default()).finish().await?;
//! println!("wrote {} docs", summary.docs_written);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod couch;
pub mod database;
pub mod error;
pub mod memory;
pub mod replication;
pub mod server;

pub use couch::{CouchDatabase, CouchOptions};
pub use database::{Database, RevsDiff};
pub use error::{DbError, Result};
pub use memory::MemoryDatabase;
pub use replication::{
    replicate, ChangeInfo, Replication, ReplicationError, ReplicationEvent, ReplicationOptions,
    ReplicationStatus, ReplicationSummary,
};
pub use server::{MemoryCouch, MemoryCouchServer};
