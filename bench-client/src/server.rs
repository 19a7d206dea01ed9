//! In-memory CouchDB server.
//!
//! Serves [`MemoryDatabase`]s over the subset of the CouchDB HTTP API that
//! [`CouchDatabase`](crate::CouchDatabase) and the replicator use, so the
//! whole benchmark pipeline (client, proxy, replication) can run without an
//! external CouchDB.
//!
//! Paths below a database that start with `_` are API endpoints
//! (`_all_docs`, `_changes`, `_bulk_docs`, `_revs_diff`); everything else is
//! a document id.

use crate::database::Database;
use crate::error::DbError;
use crate::memory::MemoryDatabase;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use bench_types::{AllDocsQuery, Document, Seq};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            DbError::NotFound { .. } | DbError::DatabaseNotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            DbError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            DbError::Decode(_) | DbError::InvalidDocument(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error"),
        };
        (
            status,
            Json(json!({ "error": error, "reason": self.to_string() })),
        )
            .into_response()
    }
}

/// Registry of in-memory databases keyed by name.
#[derive(Debug, Default)]
pub struct MemoryCouch {
    dbs: DashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryCouch {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a database by name.
    pub fn database(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.dbs.get(name).map(|db| Arc::clone(db.value()))
    }

    /// Names of all databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dbs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Result<Arc<MemoryDatabase>, DbError> {
        self.database(name).ok_or_else(|| DbError::DatabaseNotFound {
            name: name.to_string(),
        })
    }
}

/// Build the CouchDB-compatible router.
pub fn build_router(couch: Arc<MemoryCouch>) -> Router {
    Router::new()
        .route("/", get(welcome_handler))
        .route(
            "/:db",
            put(create_db_handler)
                .delete(delete_db_handler)
                .get(db_info_handler),
        )
        .route(
            "/:db/:key",
            get(get_handler).put(put_handler).post(post_handler),
        )
        .with_state(couch)
}

async fn welcome_handler() -> Json<Value> {
    Json(json!({ "couchdb": "Welcome", "vendor": { "name": "docbench-memory" } }))
}

async fn create_db_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path(db): Path<String>,
) -> Response {
    match couch.dbs.entry(db) {
        Entry::Occupied(_) => (
            StatusCode::PRECONDITION_FAILED,
            Json(json!({ "error": "file_exists", "reason": "The database could not be created, the file already exists." })),
        )
            .into_response(),
        Entry::Vacant(entry) => {
            tracing::debug!("Creating in-memory database {}", entry.key());
            let database = Arc::new(MemoryDatabase::new(entry.key().clone()));
            entry.insert(database);
            (StatusCode::CREATED, Json(json!({ "ok": true }))).into_response()
        }
    }
}

async fn delete_db_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path(db): Path<String>,
) -> Result<Json<Value>, DbError> {
    let (_, database) = couch
        .dbs
        .remove(&db)
        .ok_or(DbError::DatabaseNotFound { name: db })?;
    database.destroy().await?;
    Ok(Json(json!({ "ok": true })))
}

async fn db_info_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path(db): Path<String>,
) -> Result<Json<Value>, DbError> {
    if db == "_all_dbs" {
        return Ok(Json(json!(couch.database_names())));
    }
    let info = couch.lookup(&db)?.info().await?;
    Ok(Json(serde_json::to_value(info)?))
}

fn all_docs_query(params: &HashMap<String, String>) -> Result<AllDocsQuery, DbError> {
    let key = |name: &str| -> Result<Option<String>, DbError> {
        params
            .get(name)
            .map(|raw| serde_json::from_str::<String>(raw))
            .transpose()
            .map_err(DbError::from)
    };
    let number = |name: &str| params.get(name).and_then(|raw| raw.parse::<usize>().ok());
    Ok(AllDocsQuery {
        skip: number("skip"),
        limit: number("limit"),
        startkey: key("startkey")?,
        endkey: key("endkey")?,
        include_docs: params.get("include_docs").map(String::as_str) == Some("true"),
    })
}

async fn get_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path((db, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, DbError> {
    let database = couch.lookup(&db)?;
    match key.as_str() {
        "_all_docs" => {
            let query = all_docs_query(&params)?;
            let total_rows = database.info().await?.doc_count;
            let rows = database.all_docs(&query).await?;
            Ok(Json(json!({
                "total_rows": total_rows,
                "offset": query.skip.unwrap_or(0),
                "rows": rows,
            })))
        }
        "_changes" => {
            let since = params
                .get("since")
                .and_then(|raw| raw.parse::<u64>().ok())
                .map_or_else(Seq::zero, Seq::from_u64);
            let limit = params
                .get("limit")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            let page = database.changes(&since, limit).await?;
            Ok(Json(serde_json::to_value(page)?))
        }
        id => {
            let doc = match params.get("rev") {
                Some(rev) => {
                    let mut doc = database.get_revision(id, rev).await?;
                    if params.get("revs").map(String::as_str) != Some("true") {
                        doc.revisions = None;
                    }
                    doc
                }
                None => database.get(id).await?,
            };
            Ok(Json(serde_json::to_value(doc)?))
        }
    }
}

async fn put_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path((db, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, DbError> {
    let database = couch.lookup(&db)?;
    let body: Map<String, Value> = serde_json::from_slice(&body)?;
    let doc = Document::from_json(key, body)?;
    let result = database.put(doc).await?;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

#[derive(Deserialize)]
struct BulkDocsRequest {
    docs: Vec<Document>,
    #[serde(default = "default_new_edits")]
    new_edits: bool,
}

fn default_new_edits() -> bool {
    true
}

async fn post_handler(
    State(couch): State<Arc<MemoryCouch>>,
    Path((db, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, DbError> {
    let database = couch.lookup(&db)?;
    match key.as_str() {
        "_bulk_docs" => {
            let request: BulkDocsRequest = serde_json::from_slice(&body)?;
            let rows = if request.new_edits {
                database.bulk_docs(request.docs).await?
            } else {
                database.bulk_docs_replicated(request.docs).await?
            };
            Ok((StatusCode::CREATED, Json(rows)).into_response())
        }
        "_revs_diff" => {
            let request: BTreeMap<String, Vec<String>> = serde_json::from_slice(&body)?;
            let diff = database.revs_diff(request).await?;
            let body: BTreeMap<String, Value> = diff
                .into_iter()
                .map(|(id, missing)| (id, json!({ "missing": missing })))
                .collect();
            Ok(Json(body).into_response())
        }
        other => Err(DbError::NotFound {
            id: other.to_string(),
        }),
    }
}

/// A running in-memory CouchDB.
///
/// Dropping the handle signals shutdown; call [`shutdown`](Self::shutdown) to
/// also wait for the listener to be released.
pub struct MemoryCouchServer {
    addr: SocketAddr,
    couch: Arc<MemoryCouch>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl MemoryCouchServer {
    /// Bind and start serving.
    pub async fn start(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let couch = Arc::new(MemoryCouch::new());
        let app = build_router(Arc::clone(&couch));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!("In-memory CouchDB listening on {}", addr);
        Ok(Self {
            addr,
            couch,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL (`http://ip:port`).
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The database registry behind the server.
    pub fn couch(&self) -> &Arc<MemoryCouch> {
        &self.couch
    }

    /// Stop serving and wait for the listener to close.
    pub async fn shutdown(mut self) -> io::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(result) => result?,
                Err(e) => return Err(io::Error::other(e)),
            }
        }
        tracing::info!("In-memory CouchDB on {} stopped", self.addr);
        Ok(())
    }
}

impl Drop for MemoryCouchServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::util::ServiceExt;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn create_database_twice_is_precondition_failed() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        let (status, _) = send(&app, Method::PUT, "/bench", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&app, Method::PUT, "/bench", None).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"], "file_exists");
    }

    #[tokio::test]
    async fn missing_database_is_not_found() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        let (status, body) = send(&app, Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn document_put_get_and_conflict() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        send(&app, Method::PUT, "/bench", None).await;

        let (status, body) = send(&app, Method::PUT, "/bench/doc", Some(json!({"foo": 1}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let rev = body["rev"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, "/bench/doc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["_rev"], rev.as_str());
        assert_eq!(body["foo"], 1);

        let (status, body) = send(&app, Method::PUT, "/bench/doc", Some(json!({"foo": 2}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn document_put_uses_path_id() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        send(&app, Method::PUT, "/bench", None).await;

        let (status, body) =
            send(&app, Method::PUT, "/bench/doc_a", Some(json!({"_id": "doc_b", "n": 1}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "doc_a");

        let (status, _) = send(&app, Method::GET, "/bench/doc_b", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, Method::PUT, "/bench/doc_c", Some(json!({"_rev": 5}))).await;
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn bulk_docs_changes_and_all_docs() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        send(&app, Method::PUT, "/bench", None).await;

        let docs = json!({"docs": [{"_id": "a"}, {"_id": "b"}, {"_id": "c"}]});
        let (status, rows) = send(&app, Method::POST, "/bench/_bulk_docs", Some(docs)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(rows.as_array().unwrap().len(), 3);

        let (_, page) = send(&app, Method::GET, "/bench/_changes?since=1&limit=10", None).await;
        assert_eq!(page["results"].as_array().unwrap().len(), 2);
        assert_eq!(page["last_seq"], 3);

        let (_, all) = send(
            &app,
            Method::GET,
            "/bench/_all_docs?startkey=%22b%22&endkey=%22c%22",
            None,
        )
        .await;
        assert_eq!(all["total_rows"], 3);
        assert_eq!(all["rows"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn revs_diff_and_replicated_writes() {
        let app = build_router(Arc::new(MemoryCouch::new()));
        send(&app, Method::PUT, "/bench", None).await;

        let (_, diff) = send(
            &app,
            Method::POST,
            "/bench/_revs_diff",
            Some(json!({"a": ["2-bbb"]})),
        )
        .await;
        assert_eq!(diff["a"]["missing"], json!(["2-bbb"]));

        let docs = json!({
            "docs": [{"_id": "a", "_rev": "2-bbb", "_revisions": {"start": 2, "ids": ["bbb", "aaa"]}}],
            "new_edits": false
        });
        let (status, failures) = send(&app, Method::POST, "/bench/_bulk_docs", Some(docs)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(failures, json!([]));

        let (_, doc) = send(&app, Method::GET, "/bench/a?rev=2-bbb&revs=true", None).await;
        assert_eq!(doc["_revisions"]["ids"], json!(["bbb", "aaa"]));

        let (_, diff) = send(
            &app,
            Method::POST,
            "/bench/_revs_diff",
            Some(json!({"a": ["2-bbb", "1-aaa"]})),
        )
        .await;
        assert_eq!(diff, json!({}));
    }

    #[tokio::test]
    async fn delete_database_removes_it() {
        let couch = Arc::new(MemoryCouch::new());
        let app = build_router(Arc::clone(&couch));
        send(&app, Method::PUT, "/bench", None).await;
        assert_eq!(couch.database_names(), vec!["bench".to_string()]);

        let (status, _) = send(&app, Method::DELETE, "/bench", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(couch.database("bench").is_none());

        let (status, _) = send(&app, Method::DELETE, "/bench", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
