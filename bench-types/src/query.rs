//! Changes feed, `_all_docs` and database info types.

use crate::{Document, Seq};
use serde::{Deserialize, Serialize};

/// A revision reference inside a changes row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    /// Leaf revision.
    pub rev: String,
}

/// One row of the changes feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// Sequence at which this document last changed.
    pub seq: Seq,
    /// Document id.
    pub id: String,
    /// Leaf revisions of the document.
    pub changes: Vec<ChangeRev>,
    /// Whether the winning revision is a tombstone.
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeRow {
    /// Revision strings listed in this row.
    pub fn revs(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.rev.clone()).collect()
    }
}

/// A page of the changes feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Changed documents, ordered by sequence.
    pub results: Vec<ChangeRow>,
    /// Sequence to resume from.
    pub last_seq: Seq,
}

/// Query options for `_all_docs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllDocsQuery {
    /// Number of rows to skip.
    pub skip: Option<usize>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Inclusive lower bound on the document id.
    pub startkey: Option<String>,
    /// Inclusive upper bound on the document id.
    pub endkey: Option<String>,
    /// Include document bodies.
    pub include_docs: bool,
}

impl AllDocsQuery {
    /// Page through ids with skip/limit.
    pub fn page(skip: usize, limit: usize) -> Self {
        Self {
            skip: Some(skip),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Select an inclusive id range.
    pub fn range(startkey: impl Into<String>, endkey: impl Into<String>) -> Self {
        Self {
            startkey: Some(startkey.into()),
            endkey: Some(endkey.into()),
            ..Default::default()
        }
    }

    /// Whether `id` falls inside the key range.
    pub fn in_range(&self, id: &str) -> bool {
        self.startkey.as_deref().map_or(true, |start| id >= start)
            && self.endkey.as_deref().map_or(true, |end| id <= end)
    }

    /// Render as CouchDB query parameters. Keys are JSON encoded.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(start) = &self.startkey {
            pairs.push(("startkey", serde_json::Value::from(start.as_str()).to_string()));
        }
        if let Some(end) = &self.endkey {
            pairs.push(("endkey", serde_json::Value::from(end.as_str()).to_string()));
        }
        if self.include_docs {
            pairs.push(("include_docs", "true".to_string()));
        }
        pairs
    }
}

/// Revision reported by an `_all_docs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllDocsValue {
    /// Winning revision.
    pub rev: String,
}

/// One row of `_all_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsRow {
    /// Document id.
    pub id: String,
    /// Row key (the document id).
    pub key: String,
    /// Winning revision.
    pub value: AllDocsValue,
    /// Document body when `include_docs` was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// Database metadata as returned by `GET /{db}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub db_name: String,
    /// Number of live documents.
    pub doc_count: u64,
    /// Current update sequence.
    pub update_seq: Seq,
}
