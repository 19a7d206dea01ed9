//! latency-proxy binary entry point.
//!
//! Usage:
//! ```bash
//! latency-proxy --upstream http://localhost:5984 --latency-ms 50
//! latency-proxy --config proxy.toml --port 3002
//! ```

use anyhow::{Context, Result};
use bench_proxy::{ProxyConfig, ProxyServer};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Reverse proxy that delays every request before forwarding it.
#[derive(Parser, Debug)]
#[command(name = "latency-proxy")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream server URL
    #[arg(short, long)]
    upstream: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Delay added to every request, in milliseconds
    #[arg(short, long)]
    latency_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();

    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    if let Some(upstream) = args.upstream {
        config.upstream = upstream;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(latency_ms) = args.latency_ms {
        config.latency_ms = latency_ms;
    }

    let proxy = ProxyServer::start(config)
        .await
        .context("failed to start proxy")?;
    println!("Proxying {} (Ctrl-C to stop)", proxy.url());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    proxy.shutdown().await?;
    Ok(())
}
