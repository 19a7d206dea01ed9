//! Pull replication benchmark.

use super::{BenchCase, CaseContext};
use crate::error::{HarnessError, Result};
use crate::fixture::{build_fixture, FixtureSpec, GenerationStrategy};
use async_trait::async_trait;
use bench_client::{
    replicate, CouchDatabase, Database, ReplicationEvent, ReplicationOptions, ReplicationStatus,
};
use bench_proxy::{ProxyConfig, ProxyServer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Url;
use std::sync::Arc;

/// Settings for a [`PullReplicationCase`].
#[derive(Debug, Clone)]
pub struct PullReplicationConfig {
    /// Name shown in reports.
    pub name: String,
    /// Replications to time, each into its own local database.
    pub iterations: usize,
    /// Revisions written per fixture document; at least 1.
    pub generations: u32,
    /// Fixture size.
    pub num_docs: u64,
    /// Changes per replication batch.
    pub batch_size: usize,
    /// Delay added by the proxy; `None` replicates without a proxy.
    pub added_latency_ms: Option<u64>,
    /// Connection pool size for the remote, and fetch concurrency.
    pub max_sockets: usize,
    /// How fixture generations after the first are written.
    pub strategy: GenerationStrategy,
    /// Replicate from this existing database instead of building a fixture.
    pub source_url: Option<String>,
    /// Stop each replication once this many documents are written.
    pub stop_after_docs: Option<u64>,
}

impl PullReplicationConfig {
    /// Ten documents, one generation, batch 100, 10ms latency, 15 sockets.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iterations: 1,
            generations: 1,
            num_docs: 10,
            batch_size: 100,
            added_latency_ms: Some(10),
            max_sockets: 15,
            strategy: GenerationStrategy::Bulk,
            source_url: None,
            stop_after_docs: None,
        }
    }
}

/// Times one-shot pull replications from a remote into fresh local databases.
///
/// Setup creates a random remote database, fills it with the fixture and
/// starts the latency proxy in front of it. Iteration `i` replicates the
/// proxied remote into local database `i`.
pub struct PullReplicationCase {
    config: PullReplicationConfig,
    rng: StdRng,
    remote: Option<Arc<CouchDatabase>>,
    proxy: Option<ProxyServer>,
    source: Option<Arc<CouchDatabase>>,
    locals: Vec<Arc<dyn Database>>,
}

impl PullReplicationCase {
    /// Check `config` and build the case.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidCase`] for zero generations or batch size.
    pub fn new(config: PullReplicationConfig) -> Result<Self> {
        if config.generations == 0 {
            return Err(HarnessError::InvalidCase(format!(
                "{}: generations must be > 0",
                config.name
            )));
        }
        if config.batch_size == 0 || config.max_sockets == 0 {
            return Err(HarnessError::InvalidCase(format!(
                "{}: batch_size and max_sockets must be > 0",
                config.name
            )));
        }
        Ok(Self {
            config,
            rng: StdRng::from_entropy(),
            remote: None,
            proxy: None,
            source: None,
            locals: Vec::new(),
        })
    }

    /// Settings of this case.
    pub fn config(&self) -> &PullReplicationConfig {
        &self.config
    }

    /// Address of the running proxy, if any.
    pub fn proxy_addr(&self) -> Option<std::net::SocketAddr> {
        self.proxy.as_ref().map(ProxyServer::local_addr)
    }

    /// Documents every iteration is expected to write, when known.
    fn expected_docs(&self) -> Option<u64> {
        match (self.config.stop_after_docs, &self.config.source_url) {
            (Some(limit), _) => Some(limit),
            (None, None) => Some(self.config.num_docs),
            (None, Some(_)) => None,
        }
    }

    async fn open_source(&mut self, ctx: &CaseContext) -> Result<Url> {
        if let Some(url) = &self.config.source_url {
            return Url::parse(url).map_err(|e| {
                HarnessError::InvalidCase(format!("{}: bad source url {}: {}", self.config.name, url, e))
            });
        }

        let remote = ctx
            .backend
            .remote(&ctx.random_db_name(), self.config.max_sockets)?;
        remote.create().await?;
        self.remote = Some(Arc::clone(&remote));

        let spec = FixtureSpec::new(self.config.num_docs, self.config.generations)
            .with_strategy(self.config.strategy);
        build_fixture(remote.as_ref(), &spec, &mut self.rng).await?;
        Ok(remote.url().clone())
    }
}

#[async_trait]
impl BenchCase for PullReplicationCase {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn iterations(&self) -> usize {
        self.config.iterations
    }

    async fn setup(&mut self, ctx: &CaseContext) -> Result<()> {
        let options = ctx.backend.couch_options(self.config.max_sockets);

        for _ in 0..self.config.iterations {
            let local = ctx.backend.open(
                ctx.config.local_backend,
                &ctx.random_db_name(),
                self.config.max_sockets,
            )?;
            local.create().await?;
            self.locals.push(local);
        }

        let source_url = self.open_source(ctx).await?;

        let source_url = match self.config.added_latency_ms {
            Some(latency_ms) => {
                let upstream = source_url.origin().ascii_serialization();
                let proxy_config =
                    ProxyConfig::new(upstream, latency_ms).with_port(ctx.config.proxy_port);
                let proxy = ProxyServer::start(proxy_config).await?;
                let proxied = proxy.proxied_url(&source_url)?;
                self.proxy = Some(proxy);
                proxied
            }
            None => source_url,
        };

        let source = CouchDatabase::from_url(source_url.as_str(), options)?;
        tracing::info!(
            "{}: replicating from {} into {} local databases",
            self.config.name,
            source.url(),
            self.locals.len()
        );
        self.source = Some(Arc::new(source));
        Ok(())
    }

    async fn run_iteration(&mut self, _ctx: &CaseContext, itr: usize) -> Result<()> {
        let (source, local) = match (&self.source, self.locals.get(itr)) {
            (Some(source), Some(local)) => (Arc::clone(source), Arc::clone(local)),
            _ => {
                return Err(HarnessError::InvalidCase(format!(
                    "{}: iteration {} has no prepared databases",
                    self.config.name, itr
                )))
            }
        };

        let options = ReplicationOptions {
            batch_size: self.config.batch_size,
            max_concurrency: self.config.max_sockets,
            stop_after_docs: self.config.stop_after_docs,
        };
        let mut replication = replicate(source, local, options);
        while let Some(event) = replication.next_event().await {
            match event {
                ReplicationEvent::Change(info) => {
                    tracing::debug!("{}: {} docs written", self.config.name, info.docs_written)
                }
                ReplicationEvent::Complete(summary) => {
                    tracing::debug!("{}: replication {:?}", self.config.name, summary.status)
                }
                ReplicationEvent::Error(e) => {
                    tracing::error!("{}: replication failed: {}", self.config.name, e)
                }
            }
        }
        let summary = replication.finish().await?;

        if summary.doc_write_failures > 0 {
            return Err(HarnessError::Assertion(format!(
                "{}: {} documents failed to write",
                self.config.name, summary.doc_write_failures
            )));
        }
        match self.expected_docs() {
            Some(limit) if self.config.stop_after_docs.is_some() => {
                if summary.docs_written < limit || summary.status != ReplicationStatus::Cancelled {
                    return Err(HarnessError::Assertion(format!(
                        "{}: expected to stop after {} docs, wrote {} ({:?})",
                        self.config.name, limit, summary.docs_written, summary.status
                    )));
                }
            }
            Some(expected) if summary.docs_written != expected => {
                return Err(HarnessError::Assertion(format!(
                    "{}: expected {} docs written, got {}",
                    self.config.name, expected, summary.docs_written
                )));
            }
            _ => {}
        }
        Ok(())
    }

    async fn teardown(&mut self, _ctx: &CaseContext) -> Result<()> {
        let mut first_error: Option<HarnessError> = None;

        if let Some(proxy) = self.proxy.take() {
            if let Err(e) = proxy.shutdown().await {
                tracing::warn!("{}: proxy shutdown failed: {}", self.config.name, e);
                first_error.get_or_insert(e.into());
            }
        }
        self.source = None;

        if let Some(remote) = self.remote.take() {
            if let Err(e) = remote.destroy().await {
                tracing::warn!("{}: destroying {} failed: {}", self.config.name, remote.name(), e);
                first_error.get_or_insert(e.into());
            }
        }
        for local in self.locals.drain(..) {
            if let Err(e) = local.destroy().await {
                tracing::warn!("{}: destroying {} failed: {}", self.config.name, local.name(), e);
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_generations_is_invalid() {
        let mut config = PullReplicationConfig::new("bad");
        config.generations = 0;
        assert!(matches!(
            PullReplicationCase::new(config),
            Err(HarnessError::InvalidCase(_))
        ));
    }

    #[test]
    fn expected_docs_follows_source() {
        let case = PullReplicationCase::new(PullReplicationConfig::new("fixture")).unwrap();
        assert_eq!(case.expected_docs(), Some(10));

        let mut config = PullReplicationConfig::new("external");
        config.source_url = Some("http://couch:5984/registry".into());
        let case = PullReplicationCase::new(config.clone()).unwrap();
        assert_eq!(case.expected_docs(), None);

        config.stop_after_docs = Some(200);
        let case = PullReplicationCase::new(config).unwrap();
        assert_eq!(case.expected_docs(), Some(200));
    }

    #[tokio::test]
    async fn teardown_without_setup_is_noop() {
        let ctx = CaseContext::new(crate::config::HarnessConfig::default());
        let mut case = PullReplicationCase::new(PullReplicationConfig::new("idle")).unwrap();
        case.teardown(&ctx).await.unwrap();
        assert!(case.proxy_addr().is_none());
    }

    #[tokio::test]
    async fn iteration_without_setup_is_invalid() {
        let ctx = CaseContext::new(crate::config::HarnessConfig::default());
        let mut case = PullReplicationCase::new(PullReplicationConfig::new("idle")).unwrap();
        assert!(matches!(
            case.run_iteration(&ctx, 0).await,
            Err(HarnessError::InvalidCase(_))
        ));
    }
}
