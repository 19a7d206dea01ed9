//! Request forwarding.
//!
//! The proxy has a single fallback route: every method and path is delayed,
//! then replayed against the upstream.

use crate::error::{ProxyError, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, Uri};
use axum::response::Response;
use axum::Router;
use reqwest::Url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Shared state of the forwarding handler.
pub struct ForwardState {
    client: reqwest::Client,
    upstream: Url,
    latency: Duration,
    body_limit: usize,
    forwarded: AtomicU64,
}

impl ForwardState {
    /// Create the state for forwarding to `upstream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(upstream: Url, latency: Duration, body_limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            upstream,
            latency,
            body_limit,
            forwarded: AtomicU64::new(0),
        })
    }

    /// Requests answered by the upstream so far.
    pub fn requests_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Delay added to each request.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Path of the upstream URL, without a trailing `/`. Empty for an origin.
    fn prefix(&self) -> &str {
        self.upstream.path().trim_end_matches('/')
    }

    /// Upstream URL for an inbound request URI. The inbound path is appended
    /// to the upstream's path; the query is kept.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        url.set_path(&format!("{}{}", self.prefix(), uri.path()));
        url.set_query(uri.query());
        url
    }

    /// Inbound path that [`target_url`](Self::target_url) maps to the
    /// upstream path `path`. Paths outside the upstream's prefix are returned
    /// unchanged.
    pub fn inbound_path<'a>(&self, path: &'a str) -> &'a str {
        match path.strip_prefix(self.prefix()) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

/// Router that forwards everything through `state`.
pub fn build_router(state: Arc<ForwardState>) -> Router {
    Router::new().fallback(forward_handler).with_state(state)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

async fn forward_handler(
    State(state): State<Arc<ForwardState>>,
    request: Request,
) -> Result<Response> {
    tokio::time::sleep(state.latency).await;

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.body_limit)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;
    let url = state.target_url(&parts.uri);
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    // Recomputed by the client from the buffered body.
    headers.remove(header::CONTENT_LENGTH);

    tracing::debug!("Forwarding {} {}", parts.method, url);
    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let bytes = upstream.bytes().await?;
    state.forwarded.fetch_add(1, Ordering::Relaxed);

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
