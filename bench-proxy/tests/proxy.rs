//! Latency proxy end-to-end tests against real local upstreams.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::{get, post};
use axum::Router;
use bench_client::{CouchDatabase, CouchOptions, Database, MemoryCouchServer};
use bench_proxy::{ProxyConfig, ProxyError, ProxyServer};
use bench_types::{doc_id, Document};
use serial_test::serial;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

async fn echo(headers: HeaderMap, body: Bytes) -> (StatusCode, HeaderMap, Bytes) {
    let mut reply = HeaderMap::new();
    if let Some(ct) = headers.get("content-type") {
        reply.insert("content-type", ct.clone());
    }
    if let Some(tag) = headers.get("x-bench-tag") {
        reply.insert("x-bench-tag", tag.clone());
    }
    (StatusCode::CREATED, reply, body)
}

async fn start_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/hello", get(|| async { ([("x-upstream", "yes")], "hello world") }))
        .route("/echo", post(echo))
        .route(
            "/teapot",
            get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }),
        )
        .route(
            "/query",
            get(|uri: Uri| async move { uri.query().unwrap_or_default().to_string() }),
        )
        .route("/base/hello", get(|| async { "hello from base" }))
        .route(
            "/sized",
            get(|| async { "eleven char" })
                .head(|| async { ([(header::CONTENT_LENGTH, "11")], ()) }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

fn config(upstream: SocketAddr, latency_ms: u64) -> ProxyConfig {
    ProxyConfig::new(format!("http://{}", upstream), latency_ms).with_port(0)
}

#[tokio::test]
async fn adds_latency_and_preserves_response() {
    let upstream = start_upstream().await;
    let proxy = ProxyServer::start(config(upstream, 200)).await.unwrap();
    let client = reqwest::Client::new();

    let direct = client
        .get(format!("http://{}/hello", upstream))
        .send()
        .await
        .unwrap();
    let direct_body = direct.text().await.unwrap();

    let started = Instant::now();
    let proxied = client
        .get(format!("{}/hello", proxy.url()))
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "elapsed {:?}", elapsed);
    assert_eq!(proxied.status(), StatusCode::OK);
    assert_eq!(proxied.headers()["x-upstream"], "yes");
    assert_eq!(proxied.text().await.unwrap(), direct_body);
    assert_eq!(proxy.requests_forwarded(), 1);

    drop(client);
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn forwards_body_headers_and_status() {
    let upstream = start_upstream().await;
    let proxy = ProxyServer::start(config(upstream, 0)).await.unwrap();
    let client = reqwest::Client::new();

    let payload = serde_json::json!({ "docs": [{ "_id": "a" }] });
    let response = client
        .post(format!("{}/echo", proxy.url()))
        .header("x-bench-tag", "run-1")
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-bench-tag"], "run-1");
    assert_eq!(response.headers()["content-type"], "application/json");
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed, payload);

    let teapot = client
        .get(format!("{}/teapot", proxy.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(teapot.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(teapot.text().await.unwrap(), "short and stout");

    drop(client);
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn forwards_query_string() {
    let upstream = start_upstream().await;
    let proxy = ProxyServer::start(config(upstream, 0)).await.unwrap();

    let body = reqwest::get(format!("{}/query?since=0&limit=100", proxy.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "since=0&limit=100");

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn upstream_path_is_prepended() {
    let upstream = start_upstream().await;
    let config = ProxyConfig::new(format!("http://{}/base", upstream), 0).with_port(0);
    let proxy = ProxyServer::start(config).await.unwrap();

    let body = reqwest::get(format!("{}/hello", proxy.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello from base");

    let remote = reqwest::Url::parse(&format!("http://{}/base/hello", upstream)).unwrap();
    let proxied = proxy.proxied_url(&remote).unwrap();
    assert_eq!(proxied.path(), "/hello");
    let body = reqwest::get(proxied).await.unwrap().text().await.unwrap();
    assert_eq!(body, "hello from base");

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn head_keeps_upstream_content_length() {
    let upstream = start_upstream().await;
    let proxy = ProxyServer::start(config(upstream, 0)).await.unwrap();
    let client = reqwest::Client::new();

    let direct = client
        .head(format!("http://{}/sized", upstream))
        .send()
        .await
        .unwrap();
    let proxied = client
        .head(format!("{}/sized", proxy.url()))
        .send()
        .await
        .unwrap();

    assert_eq!(proxied.status(), StatusCode::OK);
    assert_eq!(direct.headers()[header::CONTENT_LENGTH], "11");
    assert_eq!(proxied.headers()[header::CONTENT_LENGTH], "11");

    let body = client
        .get(format!("{}/sized", proxy.url()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "eleven char");

    drop(client);
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = ProxyServer::start(config(closed, 0)).await.unwrap();

    let response = reqwest::get(format!("{}/anything", proxy.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(proxy.requests_forwarded(), 0);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn shutdown_releases_port() {
    let upstream = start_upstream().await;
    let first = ProxyServer::start(config(upstream, 0)).await.unwrap();
    let port = first.local_addr().port();

    // A second proxy on the same port cannot start while the first runs.
    let clash = ProxyServer::start(config(upstream, 0).with_port(port)).await;
    assert!(matches!(clash, Err(ProxyError::Bind { .. })));

    first.shutdown().await.unwrap();

    let second = ProxyServer::start(config(upstream, 0).with_port(port))
        .await
        .unwrap();
    assert_eq!(second.local_addr().port(), port);
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn couch_client_works_through_proxy() {
    let couch = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let proxy = ProxyServer::start(config(couch.local_addr(), 5))
        .await
        .unwrap();

    let db = CouchDatabase::new(&proxy.url(), "through_proxy", CouchOptions::default()).unwrap();
    db.create().await.unwrap();
    let mut rng = rand::thread_rng();
    let docs: Vec<Document> = (0..10).map(|i| Document::bench(doc_id(i), &mut rng)).collect();
    let results = db.bulk_docs(docs).await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));

    let info = db.info().await.unwrap();
    assert_eq!(info.doc_count, 10);
    assert!(couch.couch().database("through_proxy").is_some());
    assert!(proxy.requests_forwarded() >= 3);

    drop(db);
    proxy.shutdown().await.unwrap();
    couch.shutdown().await.unwrap();
}
