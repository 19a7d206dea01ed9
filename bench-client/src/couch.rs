//! CouchDB HTTP API client.
//!
//! Implements [`Database`] for a database on a CouchDB server (or anything
//! that speaks the same HTTP subset, such as the in-memory server or the
//! latency proxy in front of either).

use crate::database::{Database, RevsDiff};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use bench_types::{AllDocsQuery, AllDocsRow, ChangesPage, DatabaseInfo, Document, Seq, WriteResult};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection options for [`CouchDatabase`].
#[derive(Debug, Clone)]
pub struct CouchOptions {
    /// Maximum pooled connections kept per host.
    pub max_sockets: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for CouchOptions {
    fn default() -> Self {
        Self {
            max_sockets: 15,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Deserialize)]
struct RevsDiffEntry {
    #[serde(default)]
    missing: Vec<String>,
}

/// A database on a CouchDB server.
#[derive(Debug, Clone)]
pub struct CouchDatabase {
    name: String,
    db_url: Url,
    http: reqwest::Client,
}

impl CouchDatabase {
    /// Connect to database `name` on the server at `host`.
    pub fn new(host: &str, name: &str, options: CouchOptions) -> Result<Self> {
        let mut db_url = Url::parse(host).map_err(|e| DbError::InvalidUrl(format!("{}: {}", host, e)))?;
        db_url
            .path_segments_mut()
            .map_err(|_| DbError::InvalidUrl(host.to_string()))?
            .pop_if_empty()
            .push(name);
        Self::with_url(db_url, options)
    }

    /// Connect to the database at a full URL (`http://host:port/db`).
    pub fn from_url(url: &str, options: CouchOptions) -> Result<Self> {
        let db_url = Url::parse(url).map_err(|e| DbError::InvalidUrl(format!("{}: {}", url, e)))?;
        Self::with_url(db_url, options)
    }

    fn with_url(db_url: Url, options: CouchOptions) -> Result<Self> {
        let name = db_url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| DbError::InvalidUrl(format!("{}: missing database name", db_url)))?
            .to_string();

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(options.max_sockets)
            .timeout(options.timeout)
            .build()?;

        Ok(Self { name, db_url, http })
    }

    /// Full URL of the database.
    pub fn url(&self) -> &Url {
        &self.db_url
    }

    /// URL of a path below the database. Segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.db_url.clone();
        url.path_segments_mut()
            .map_err(|_| DbError::InvalidUrl(self.db_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map a non-success response to a [`DbError`].
    async fn check(&self, response: reqwest::Response, id: Option<&str>) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = response.text().await.unwrap_or_default();
        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => DbError::NotFound { id: id.to_string() },
            (StatusCode::NOT_FOUND, None) => DbError::DatabaseNotFound {
                name: self.name.clone(),
            },
            (StatusCode::CONFLICT, Some(id)) => DbError::Conflict { id: id.to_string() },
            _ => DbError::Status {
                status: status.as_u16(),
                reason,
            },
        })
    }
}

#[async_trait]
impl Database for CouchDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> Result<()> {
        let response = self.http.put(self.db_url.clone()).send().await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            tracing::debug!("Database {} already exists", self.name);
            return Ok(());
        }
        self.check(response, None).await?;
        tracing::debug!("Created database {}", self.db_url);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let response = self.http.delete(self.db_url.clone()).send().await?;
        self.check(response, None).await?;
        tracing::debug!("Destroyed database {}", self.db_url);
        Ok(())
    }

    async fn info(&self) -> Result<DatabaseInfo> {
        let response = self.http.get(self.db_url.clone()).send().await?;
        let response = self.check(response, None).await?;
        Ok(response.json().await?)
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
        let url = self.endpoint(&["_bulk_docs"])?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "docs": docs }))
            .send()
            .await?;
        let response = self.check(response, None).await?;
        Ok(response.json().await?)
    }

    async fn get(&self, id: &str) -> Result<Document> {
        let url = self.endpoint(&[id])?;
        let response = self.http.get(url).send().await?;
        let response = self.check(response, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn put(&self, doc: Document) -> Result<WriteResult> {
        doc.validate()?;
        let url = self.endpoint(&[doc.id.as_str()])?;
        let response = self.http.put(url).json(&doc).send().await?;
        let response = self.check(response, Some(doc.id.as_str())).await?;
        Ok(response.json().await?)
    }

    async fn all_docs(&self, query: &AllDocsQuery) -> Result<Vec<AllDocsRow>> {
        let url = self.endpoint(&["_all_docs"])?;
        let response = self
            .http
            .get(url)
            .query(&query.query_pairs())
            .send()
            .await?;
        let response = self.check(response, None).await?;
        let body: AllDocsResponse = response.json().await?;
        Ok(body.rows)
    }

    async fn changes(&self, since: &Seq, limit: usize) -> Result<ChangesPage> {
        let url = self.endpoint(&["_changes"])?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("since", since.as_query_param()),
                ("limit", limit.to_string()),
                ("style", "all_docs".to_string()),
            ])
            .send()
            .await?;
        let response = self.check(response, None).await?;
        Ok(response.json().await?)
    }

    async fn revs_diff(&self, revs: BTreeMap<String, Vec<String>>) -> Result<RevsDiff> {
        if revs.is_empty() {
            return Ok(RevsDiff::new());
        }
        let url = self.endpoint(&["_revs_diff"])?;
        let response = self.http.post(url).json(&revs).send().await?;
        let response = self.check(response, None).await?;
        let body: BTreeMap<String, RevsDiffEntry> = response.json().await?;
        Ok(body
            .into_iter()
            .filter(|(_, entry)| !entry.missing.is_empty())
            .map(|(id, entry)| (id, entry.missing))
            .collect())
    }

    async fn get_revision(&self, id: &str, rev: &str) -> Result<Document> {
        let url = self.endpoint(&[id])?;
        let response = self
            .http
            .get(url)
            .query(&[("rev", rev), ("revs", "true")])
            .send()
            .await?;
        let response = self.check(response, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn bulk_docs_replicated(&self, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
        let url = self.endpoint(&["_bulk_docs"])?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "docs": docs, "new_edits": false }))
            .send()
            .await?;
        let response = self.check(response, None).await?;
        let rows: Vec<WriteResult> = response.json().await?;
        Ok(rows.into_iter().filter(|row| row.error.is_some()).collect())
    }
}
