//! Benchmark cases.
//!
//! A case owns whatever it creates in [`BenchCase::setup`] and must release
//! it in [`BenchCase::teardown`], which the runner calls even when setup or
//! an iteration failed.

mod basics;
mod replication;

pub use basics::{BasicCase, BasicWorkload};
pub use replication::{PullReplicationCase, PullReplicationConfig};

use crate::backend::Backend;
use crate::config::HarnessConfig;
use crate::error::Result;
use async_trait::async_trait;
use bench_types::safe_random_db_name;

/// Shared, read-only inputs for every case in a run.
#[derive(Debug, Clone)]
pub struct CaseContext {
    /// Resolved configuration.
    pub config: HarnessConfig,
    /// Database factory for `config`.
    pub backend: Backend,
}

impl CaseContext {
    /// Context for `config`.
    pub fn new(config: HarnessConfig) -> Self {
        let backend = Backend::new(&config);
        Self { config, backend }
    }

    /// Fresh database name that is safe on every backend.
    pub fn random_db_name(&self) -> String {
        safe_random_db_name(&mut rand::thread_rng())
    }
}

/// One benchmark: setup once, time `iterations()` iterations, tear down.
#[async_trait]
pub trait BenchCase: Send {
    /// Name shown in reports.
    fn name(&self) -> &str;

    /// Number of timed iterations.
    fn iterations(&self) -> usize;

    /// Prepare databases and fixtures. Not timed as part of the iterations.
    async fn setup(&mut self, ctx: &CaseContext) -> Result<()>;

    /// Run timed iteration `itr` (0-based).
    async fn run_iteration(&mut self, ctx: &CaseContext, itr: usize) -> Result<()>;

    /// Release everything created by `setup`, including after partial setup.
    async fn teardown(&mut self, ctx: &CaseContext) -> Result<()>;
}
