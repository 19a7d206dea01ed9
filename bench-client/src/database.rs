//! Database abstraction for docbench.
//!
//! This module provides the async interface the fixtures, benchmark cases and
//! the replicator are written against. Two backends implement it: the CouchDB
//! HTTP client and the in-memory database.
//!
//! # Design
//!
//! The operations mirror the CouchDB document API:
//! - `bulk_docs()` / `put()` write with new edits (revision checks apply)
//! - `get()` / `all_docs()` read winning revisions
//! - `changes()`, `revs_diff()`, `get_revision()` and `bulk_docs_replicated()`
//!   are the replication primitives

use crate::error::Result;
use async_trait::async_trait;
use bench_types::{AllDocsQuery, AllDocsRow, ChangesPage, DatabaseInfo, Document, Seq, WriteResult};
use std::collections::BTreeMap;

/// Missing revisions per document id, as answered by `_revs_diff`.
pub type RevsDiff = BTreeMap<String, Vec<String>>;

/// A CouchDB-style document database.
#[async_trait]
pub trait Database: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Create the database. Succeeds if it already exists.
    async fn create(&self) -> Result<()>;

    /// Delete the database and all its documents.
    async fn destroy(&self) -> Result<()>;

    /// Database metadata.
    async fn info(&self) -> Result<DatabaseInfo>;

    /// Write a batch of documents.
    ///
    /// Per-document failures (e.g. conflicts) are reported in the returned
    /// rows, in input order; only transport-level failures return `Err`.
    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>>;

    /// Fetch the winning revision of a document.
    async fn get(&self, id: &str) -> Result<Document>;

    /// Write a single document. A stale `_rev` is a [`Conflict`](crate::DbError::Conflict).
    async fn put(&self, doc: Document) -> Result<WriteResult>;

    /// Query `_all_docs`, ordered by id.
    async fn all_docs(&self, query: &AllDocsQuery) -> Result<Vec<AllDocsRow>>;

    /// Read up to `limit` changes after `since`.
    async fn changes(&self, since: &Seq, limit: usize) -> Result<ChangesPage>;

    /// Report which of the given revisions this database does not have.
    async fn revs_diff(&self, revs: BTreeMap<String, Vec<String>>) -> Result<RevsDiff>;

    /// Fetch a specific revision together with its `_revisions` history.
    async fn get_revision(&self, id: &str, rev: &str) -> Result<Document>;

    /// Store documents with their existing revisions (`new_edits=false`).
    ///
    /// Returns only the rows that failed.
    async fn bulk_docs_replicated(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>>;
}
