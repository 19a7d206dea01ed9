//! # bench-types
//!
//! Document model types shared by the docbench crates.
//!
//! This crate provides the foundational types used across all docbench crates:
//! - [`doc_id`], [`safe_random_db_name`] - Identifier generation
//! - [`Document`], [`Revision`], [`Revisions`] - CouchDB documents and revisions
//! - [`Seq`], [`ChangesPage`], [`AllDocsQuery`] - Feed and query types
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod document;
mod error;
mod ids;
mod query;

pub use document::{Document, Revisions, WriteResult};
pub use error::TypesError;
pub use ids::{doc_id, safe_random_db_name, Revision, Seq, DOC_ID_WIDTH};
pub use query::{AllDocsQuery, AllDocsRow, AllDocsValue, ChangeRev, ChangeRow, ChangesPage, DatabaseInfo};
