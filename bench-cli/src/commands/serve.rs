//! Serve command - run an in-memory CouchDB.
//!
//! Speaks enough of the CouchDB HTTP API for every benchmark case, so the
//! suites can run without a real server.

use anyhow::{Context, Result};
use bench_client::MemoryCouchServer;

/// Run the serve command until Ctrl-C.
pub async fn run(host: &str, port: u16) -> Result<()> {
    let server = MemoryCouchServer::start((host, port))
        .await
        .with_context(|| format!("Failed to listen on {}:{}", host, port))?;

    println!("In-memory CouchDB listening on {}", server.url());
    println!("Benchmark it with: COUCH_HOST={} docbench run", server.url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    server.shutdown().await?;
    Ok(())
}
