//! Opening databases for benchmark cases.

use crate::config::{BackendKind, HarnessConfig};
use crate::error::Result;
use bench_client::{CouchDatabase, CouchOptions, Database, MemoryDatabase};
use std::sync::Arc;

/// Creates database handles against the configured server.
#[derive(Debug, Clone)]
pub struct Backend {
    config: HarnessConfig,
}

impl Backend {
    /// Backend for `config`.
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Connection options with a socket pool of `max_sockets`.
    pub fn couch_options(&self, max_sockets: usize) -> CouchOptions {
        CouchOptions {
            max_sockets,
            timeout: self.config.request_timeout(),
        }
    }

    /// Handle to database `name` on the CouchDB server. Nothing is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or name do not form a valid URL.
    pub fn remote(&self, name: &str, max_sockets: usize) -> Result<Arc<CouchDatabase>> {
        let url = self.config.remote_db_url(name);
        let db = CouchDatabase::from_url(&url, self.couch_options(max_sockets))?;
        Ok(Arc::new(db))
    }

    /// Handle to database `name` on the backend `kind`. Nothing is created.
    ///
    /// # Errors
    ///
    /// Returns an error if a CouchDB URL cannot be built.
    pub fn open(
        &self,
        kind: BackendKind,
        name: &str,
        max_sockets: usize,
    ) -> Result<Arc<dyn Database>> {
        let db: Arc<dyn Database> = match kind {
            BackendKind::Memory => Arc::new(MemoryDatabase::new(name)),
            BackendKind::Couch => self.remote(name, max_sockets)?,
        };
        tracing::debug!("Opened {:?} database {}", kind, name);
        Ok(db)
    }
}
