//! In-memory database with CouchDB revision semantics.
//!
//! Keeps the winning revision of every document, its revision history and a
//! per-database update sequence. Non-winning branches are remembered only as
//! known revisions so `_revs_diff` does not request them again.

use crate::database::{Database, RevsDiff};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use bench_types::{
    AllDocsQuery, AllDocsRow, AllDocsValue, ChangeRev, ChangeRow, ChangesPage, DatabaseInfo,
    Document, Revision, Revisions, Seq, WriteResult,
};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::Mutex;

/// Maximum revision history kept per document (CouchDB's default `_revs_limit`).
pub const REVS_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: Revision,
    /// Revision hashes, newest first, including `rev`.
    history: Vec<String>,
    known: HashSet<String>,
    body: Map<String, Value>,
    deleted: bool,
    seq: u64,
}

impl StoredDoc {
    fn to_document(&self, id: &str, with_revisions: bool) -> Document {
        Document {
            id: id.to_string(),
            rev: Some(self.rev.to_string()),
            revisions: with_revisions.then(|| Revisions {
                start: self.rev.generation(),
                ids: self.history.clone(),
            }),
            deleted: self.deleted,
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    destroyed: bool,
    docs: BTreeMap<String, StoredDoc>,
    update_seq: u64,
}

impl Inner {
    fn check_exists(&self, name: &str) -> Result<()> {
        if self.destroyed {
            return Err(DbError::DatabaseNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn write_new_edit(&mut self, doc: Document) -> std::result::Result<String, DbError> {
        doc.validate()?;
        let existing = self.docs.get(&doc.id);

        let parent = match (existing, doc.rev.as_deref()) {
            (None, None) => None,
            (None, Some(_)) => return Err(DbError::Conflict { id: doc.id.clone() }),
            (Some(stored), None) if stored.deleted => Some(stored),
            (Some(_), None) => return Err(DbError::Conflict { id: doc.id.clone() }),
            (Some(stored), Some(rev)) if stored.rev.to_string() == rev => Some(stored),
            (Some(_), Some(_)) => return Err(DbError::Conflict { id: doc.id.clone() }),
        };

        let generation = parent.map_or(1, |p| p.rev.generation() + 1);
        let hash = revision_hash(parent.map(|p| &p.rev), &doc);
        let mut history = vec![hash.clone()];
        let mut known = HashSet::new();
        if let Some(parent) = parent {
            history.extend(parent.history.iter().cloned());
            history.truncate(REVS_LIMIT);
            known = parent.known.clone();
        }
        let rev = Revision::new(generation, hash);
        known.insert(rev.to_string());

        self.update_seq += 1;
        let rev_string = rev.to_string();
        self.docs.insert(
            doc.id,
            StoredDoc {
                rev,
                history,
                known,
                body: doc.body,
                deleted: doc.deleted,
                seq: self.update_seq,
            },
        );
        Ok(rev_string)
    }

    fn write_replicated(&mut self, doc: Document) -> std::result::Result<(), DbError> {
        doc.validate()?;
        let rev = doc
            .revision()?
            .ok_or_else(|| DbError::Conflict { id: doc.id.clone() })?;
        let rev_string = rev.to_string();

        let incoming_history = match &doc.revisions {
            Some(revisions) if revisions.head().as_ref() == Some(&rev) => revisions.ids.clone(),
            _ => vec![rev.hash().to_string()],
        };

        match self.docs.get_mut(&doc.id) {
            Some(stored) if stored.known.contains(&rev_string) => Ok(()),
            Some(stored) if rev <= stored.rev => {
                // Losing branch: remember it, keep the winner.
                stored.known.insert(rev_string);
                Ok(())
            }
            existing => {
                let mut known = existing.map(|s| s.known.clone()).unwrap_or_default();
                let start = rev.generation();
                known.extend(
                    incoming_history
                        .iter()
                        .enumerate()
                        .map(|(i, hash)| format!("{}-{}", start.saturating_sub(i as u64), hash)),
                );
                let mut history = incoming_history;
                history.truncate(REVS_LIMIT);

                self.update_seq += 1;
                self.docs.insert(
                    doc.id,
                    StoredDoc {
                        rev,
                        history,
                        known,
                        body: doc.body,
                        deleted: doc.deleted,
                        seq: self.update_seq,
                    },
                );
                Ok(())
            }
        }
    }
}

/// Deterministic revision hash: SHA-256 over the parent revision and the new body.
fn revision_hash(parent: Option<&Revision>, doc: &Document) -> String {
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hasher.update([doc.deleted as u8]);
    hasher.update(Value::Object(doc.body.clone()).to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// An in-process [`Database`].
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    /// Create a new, empty database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of live documents.
    pub async fn doc_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.docs.values().filter(|d| !d.deleted).count()
    }

    /// Whether the database currently exists.
    pub async fn exists(&self) -> bool {
        !self.inner.lock().await.destroyed
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.destroyed = false;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        *inner = Inner {
            destroyed: true,
            ..Inner::default()
        };
        tracing::debug!("Destroyed memory database {}", self.name);
        Ok(())
    }

    async fn info(&self) -> Result<DatabaseInfo> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        Ok(DatabaseInfo {
            db_name: self.name.clone(),
            doc_count: inner.docs.values().filter(|d| !d.deleted).count() as u64,
            update_seq: Seq::from_u64(inner.update_seq),
        })
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
        let mut inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let results = docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                match inner.write_new_edit(doc) {
                    Ok(rev) => WriteResult::success(id, rev),
                    Err(DbError::Conflict { .. }) => {
                        WriteResult::failure(id, "conflict", "Document update conflict.")
                    }
                    Err(e) => WriteResult::failure(id, "bad_request", &e.to_string()),
                }
            })
            .collect();
        Ok(results)
    }

    async fn get(&self, id: &str) -> Result<Document> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        match inner.docs.get(id) {
            Some(stored) if !stored.deleted => Ok(stored.to_document(id, false)),
            _ => Err(DbError::NotFound { id: id.to_string() }),
        }
    }

    async fn put(&self, doc: Document) -> Result<WriteResult> {
        let mut inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let id = doc.id.clone();
        let rev = inner.write_new_edit(doc)?;
        Ok(WriteResult::success(id, rev))
    }

    async fn all_docs(&self, query: &AllDocsQuery) -> Result<Vec<AllDocsRow>> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let rows = inner
            .docs
            .iter()
            .filter(|(id, stored)| !stored.deleted && query.in_range(id))
            .skip(query.skip.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(id, stored)| AllDocsRow {
                id: id.clone(),
                key: id.clone(),
                value: AllDocsValue {
                    rev: stored.rev.to_string(),
                },
                doc: query.include_docs.then(|| stored.to_document(id, false)),
            })
            .collect();
        Ok(rows)
    }

    async fn changes(&self, since: &Seq, limit: usize) -> Result<ChangesPage> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let since = since
            .as_u64()
            .or_else(|| since.as_query_param().parse().ok())
            .unwrap_or(0);

        let mut changed: Vec<(&String, &StoredDoc)> =
            inner.docs.iter().filter(|(_, d)| d.seq > since).collect();
        changed.sort_by_key(|(_, d)| d.seq);
        changed.truncate(limit);

        let last_seq = changed.last().map_or(since, |(_, d)| d.seq);
        let results = changed
            .into_iter()
            .map(|(id, stored)| ChangeRow {
                seq: Seq::from_u64(stored.seq),
                id: id.clone(),
                changes: vec![ChangeRev {
                    rev: stored.rev.to_string(),
                }],
                deleted: stored.deleted,
            })
            .collect();

        Ok(ChangesPage {
            results,
            last_seq: Seq::from_u64(last_seq),
        })
    }

    async fn revs_diff(&self, revs: BTreeMap<String, Vec<String>>) -> Result<RevsDiff> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let mut diff = RevsDiff::new();
        for (id, wanted) in revs {
            let missing: Vec<String> = match inner.docs.get(&id) {
                Some(stored) => wanted
                    .into_iter()
                    .filter(|rev| !stored.known.contains(rev))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                None => wanted,
            };
            if !missing.is_empty() {
                diff.insert(id, missing);
            }
        }
        Ok(diff)
    }

    async fn get_revision(&self, id: &str, rev: &str) -> Result<Document> {
        let inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        match inner.docs.get(id) {
            Some(stored) if stored.rev.to_string() == rev => Ok(stored.to_document(id, true)),
            _ => Err(DbError::NotFound {
                id: format!("{}@{}", id, rev),
            }),
        }
    }

    async fn bulk_docs_replicated(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
        let mut inner = self.inner.lock().await;
        inner.check_exists(&self.name)?;
        let mut failures = Vec::new();
        for doc in docs {
            let id = doc.id.clone();
            if let Err(e) = inner.write_replicated(doc) {
                failures.push(WriteResult::failure(id, "bad_request", &e.to_string()));
            }
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_types::doc_id;

    fn docs(n: u64) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(doc_id(i)).with_field("n", i))
            .collect()
    }

    #[tokio::test]
    async fn bulk_docs_assigns_first_generation() {
        let db = MemoryDatabase::new("a");
        let results = db.bulk_docs(docs(3)).await.unwrap();
        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(result.is_ok());
            assert!(result.rev.as_deref().unwrap().starts_with("1-"));
        }
        assert_eq!(db.info().await.unwrap().doc_count, 3);
    }

    #[tokio::test]
    async fn put_requires_current_rev() {
        let db = MemoryDatabase::new("a");
        let first = db.put(Document::new("x").with_field("v", 1)).await.unwrap();

        let err = db.put(Document::new("x").with_field("v", 2)).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));

        let second = db
            .put(
                Document::new("x")
                    .with_rev(first.rev.clone().unwrap())
                    .with_field("v", 2),
            )
            .await
            .unwrap();
        assert!(second.rev.unwrap().starts_with("2-"));

        let stale = db
            .put(Document::new("x").with_rev(first.rev.unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(stale, DbError::Conflict { .. }));
    }

    #[tokio::test]
    async fn bulk_docs_reports_conflicts_per_row() {
        let db = MemoryDatabase::new("a");
        db.bulk_docs(docs(1)).await.unwrap();
        let results = db.bulk_docs(docs(2)).await.unwrap();
        assert_eq!(results[0].error.as_deref(), Some("conflict"));
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn get_returns_latest_body() {
        let db = MemoryDatabase::new("a");
        let rev = db.put(Document::new("x").with_field("v", 1)).await.unwrap().rev;
        db.put(Document::new("x").with_rev(rev.unwrap()).with_field("v", 2))
            .await
            .unwrap();
        let doc = db.get("x").await.unwrap();
        assert_eq!(doc.body.get("v"), Some(&Value::from(2)));
        assert!(matches!(
            db.get("missing").await.unwrap_err(),
            DbError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn changes_are_paged_by_sequence() {
        let db = MemoryDatabase::new("a");
        db.bulk_docs(docs(5)).await.unwrap();

        let first = db.changes(&Seq::zero(), 2).await.unwrap();
        assert_eq!(first.results.len(), 2);
        assert_eq!(first.last_seq, Seq::from_u64(2));

        let rest = db.changes(&first.last_seq, 10).await.unwrap();
        assert_eq!(rest.results.len(), 3);
        assert_eq!(rest.last_seq, Seq::from_u64(5));

        let empty = db.changes(&rest.last_seq, 10).await.unwrap();
        assert!(empty.results.is_empty());
        assert_eq!(empty.last_seq, Seq::from_u64(5));
    }

    #[tokio::test]
    async fn updated_doc_moves_to_end_of_feed() {
        let db = MemoryDatabase::new("a");
        let results = db.bulk_docs(docs(2)).await.unwrap();
        let rev = results[0].rev.clone().unwrap();
        db.put(Document::new(doc_id(0)).with_rev(rev)).await.unwrap();

        let page = db.changes(&Seq::zero(), 10).await.unwrap();
        let ids: Vec<&str> = page.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![doc_id(1), doc_id(0)]);
    }

    #[tokio::test]
    async fn revs_diff_reports_unknown_revisions() {
        let db = MemoryDatabase::new("a");
        let rev = db.put(Document::new("x")).await.unwrap().rev.unwrap();

        let mut query = BTreeMap::new();
        query.insert("x".to_string(), vec![rev.clone(), "2-zzz".to_string()]);
        query.insert("y".to_string(), vec!["1-aaa".to_string()]);

        let diff = db.revs_diff(query).await.unwrap();
        assert_eq!(diff.get("x"), Some(&vec!["2-zzz".to_string()]));
        assert_eq!(diff.get("y"), Some(&vec!["1-aaa".to_string()]));
    }

    #[tokio::test]
    async fn get_revision_includes_history() {
        let db = MemoryDatabase::new("a");
        let first = db.put(Document::new("x")).await.unwrap().rev.unwrap();
        let second = db
            .put(Document::new("x").with_rev(first.clone()))
            .await
            .unwrap()
            .rev
            .unwrap();

        let doc = db.get_revision("x", &second).await.unwrap();
        let revisions = doc.revisions.unwrap();
        assert_eq!(revisions.rev_strings(), vec![second, first.clone()]);
        assert!(db.get_revision("x", &first).await.is_err());
    }

    #[tokio::test]
    async fn replicated_write_keeps_source_revisions() {
        let source = MemoryDatabase::new("src");
        let first = source.put(Document::new("x")).await.unwrap().rev.unwrap();
        let second = source
            .put(Document::new("x").with_rev(first).with_field("v", 9))
            .await
            .unwrap()
            .rev
            .unwrap();
        let doc = source.get_revision("x", &second).await.unwrap();

        let target = MemoryDatabase::new("dst");
        let failures = target.bulk_docs_replicated(vec![doc]).await.unwrap();
        assert!(failures.is_empty());

        let copied = target.get("x").await.unwrap();
        assert_eq!(copied.rev.as_deref(), Some(second.as_str()));
        assert_eq!(copied.body.get("v"), Some(&Value::from(9)));

        // Nothing left to fetch for either revision in the history.
        let mut query = BTreeMap::new();
        query.insert("x".to_string(), vec![second]);
        assert!(target.revs_diff(query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn losing_replicated_revision_does_not_replace_winner() {
        let db = MemoryDatabase::new("a");
        let winner = Document::new("x").with_rev("3-bbb").with_field("v", "win");
        let loser = Document::new("x").with_rev("2-zzz").with_field("v", "lose");
        db.bulk_docs_replicated(vec![winner, loser]).await.unwrap();

        let doc = db.get("x").await.unwrap();
        assert_eq!(doc.rev.as_deref(), Some("3-bbb"));
        assert_eq!(db.changes(&Seq::zero(), 10).await.unwrap().results.len(), 1);
    }

    #[tokio::test]
    async fn all_docs_supports_skip_limit_and_range() {
        let db = MemoryDatabase::new("a");
        db.bulk_docs(docs(20)).await.unwrap();

        let page = db.all_docs(&AllDocsQuery::page(5, 3)).await.unwrap();
        let ids: Vec<String> = page.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![doc_id(5), doc_id(6), doc_id(7)]);

        let range = db
            .all_docs(&AllDocsQuery::range(doc_id(10), doc_id(14)))
            .await
            .unwrap();
        assert_eq!(range.len(), 5);
        assert!(range.iter().all(|r| r.doc.is_none()));
    }

    #[tokio::test]
    async fn destroyed_database_rejects_operations() {
        let db = MemoryDatabase::new("a");
        db.bulk_docs(docs(2)).await.unwrap();
        db.destroy().await.unwrap();

        assert!(!db.exists().await);
        assert!(matches!(
            db.info().await.unwrap_err(),
            DbError::DatabaseNotFound { .. }
        ));

        db.create().await.unwrap();
        assert_eq!(db.doc_count().await, 0);
    }
}
