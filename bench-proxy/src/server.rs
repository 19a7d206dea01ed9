//! Proxy server lifecycle.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::forward::{build_router, ForwardState};
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running latency proxy.
///
/// The listening socket is owned by a background task. [`shutdown`] stops it
/// and waits for the socket to close; dropping the handle signals the same
/// shutdown without waiting.
///
/// [`shutdown`]: ProxyServer::shutdown
pub struct ProxyServer {
    addr: SocketAddr,
    state: Arc<ForwardState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ProxyServer {
    /// Bind the configured address and start forwarding.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream is invalid or the port is taken.
    pub async fn start(config: ProxyConfig) -> Result<Self> {
        let upstream = config.upstream_url()?;
        let state = Arc::new(ForwardState::new(
            upstream,
            config.latency(),
            config.body_limit_bytes,
        )?);

        let bind = config.bind_address();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| ProxyError::Bind {
                addr: bind.clone(),
                source: e,
            })?;
        let addr = listener.local_addr()?;
        let app = build_router(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(
            "Latency proxy listening on {} -> {} (+{}ms)",
            addr,
            config.upstream,
            config.latency_ms
        );
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the proxy is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the proxy (`http://ip:port`).
    pub fn url(&self) -> String {
        format!("http://{}", self.connect_addr())
    }

    /// Delay added to each request.
    pub fn latency(&self) -> Duration {
        self.state.latency()
    }

    /// Requests answered by the upstream so far.
    pub fn requests_forwarded(&self) -> u64 {
        self.state.requests_forwarded()
    }

    /// Rewrite `url` to go through this proxy, keeping query and credentials.
    /// A path below the upstream's own path loses that prefix, since the
    /// proxy adds it back when forwarding.
    ///
    /// # Errors
    ///
    /// Returns an error for URLs that cannot carry a host and port.
    pub fn proxied_url(&self, url: &Url) -> Result<Url> {
        let connect = self.connect_addr();
        let rewrite_err = |_| ProxyError::Rewrite(url.to_string());
        let mut proxied = url.clone();
        proxied.set_scheme("http").map_err(rewrite_err)?;
        proxied.set_ip_host(connect.ip()).map_err(rewrite_err)?;
        proxied.set_port(Some(connect.port())).map_err(rewrite_err)?;
        proxied.set_path(self.state.inbound_path(url.path()));
        Ok(proxied)
    }

    /// Stop serving and wait for the socket to be released.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task failed.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(result) => result?,
                Err(e) => return Err(ProxyError::Server(std::io::Error::other(e))),
            }
        }
        tracing::info!(
            "Latency proxy on {} stopped after {} requests",
            self.addr,
            self.requests_forwarded()
        );
        Ok(())
    }

    /// Address clients should dial; wildcard binds are reached via loopback.
    fn connect_addr(&self) -> SocketAddr {
        if self.addr.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.addr.port())
        } else {
            self.addr
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
