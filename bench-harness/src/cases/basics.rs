//! Single-database workloads: inserts, gets and all-docs queries.

use super::{BenchCase, CaseContext};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use bench_client::Database;
use bench_types::{doc_id, AllDocsQuery, Document};
use futures_util::future::try_join_all;
use std::sync::Arc;
use uuid::Uuid;

/// Documents fetched per all-docs query.
const PAGE_SIZE: usize = 10;
/// Concurrent all-docs queries per iteration.
const QUERIES_PER_ITERATION: usize = 10;
/// Spacing between the queried pages.
const PAGE_STRIDE: u64 = 100;

/// The basic workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicWorkload {
    /// Insert one small document per iteration.
    BasicInserts,
    /// Bulk-insert 100 documents per iteration.
    BulkInserts,
    /// Get one of 10000 seeded documents per iteration.
    BasicGets,
    /// Ten concurrent skip/limit pages over 1000 seeded documents.
    AllDocsSkipLimit,
    /// Ten concurrent startkey/endkey ranges over 1000 seeded documents.
    AllDocsStartkeyEndkey,
}

impl BasicWorkload {
    /// Every workload, in suite order.
    pub const ALL: [BasicWorkload; 5] = [
        BasicWorkload::BasicInserts,
        BasicWorkload::BulkInserts,
        BasicWorkload::BasicGets,
        BasicWorkload::AllDocsSkipLimit,
        BasicWorkload::AllDocsStartkeyEndkey,
    ];

    /// Report name.
    pub fn name(&self) -> &'static str {
        match self {
            BasicWorkload::BasicInserts => "basic-inserts",
            BasicWorkload::BulkInserts => "bulk-inserts",
            BasicWorkload::BasicGets => "basic-gets",
            BasicWorkload::AllDocsSkipLimit => "all-docs-skip-limit",
            BasicWorkload::AllDocsStartkeyEndkey => "all-docs-startkey-endkey",
        }
    }

    /// Iterations the workload normally runs.
    pub fn default_iterations(&self) -> usize {
        match self {
            BasicWorkload::BasicInserts => 1000,
            BasicWorkload::BulkInserts => 100,
            BasicWorkload::BasicGets => 10_000,
            BasicWorkload::AllDocsSkipLimit | BasicWorkload::AllDocsStartkeyEndkey => 50,
        }
    }

    /// Documents written during setup.
    pub fn seed_docs(&self) -> u64 {
        match self {
            BasicWorkload::BasicInserts | BasicWorkload::BulkInserts => 0,
            BasicWorkload::BasicGets => 10_000,
            BasicWorkload::AllDocsSkipLimit | BasicWorkload::AllDocsStartkeyEndkey => 1000,
        }
    }
}

/// A [`BasicWorkload`] against one fresh local database.
pub struct BasicCase {
    workload: BasicWorkload,
    iterations: usize,
    db: Option<Arc<dyn Database>>,
}

impl BasicCase {
    /// The workload with its usual iteration count.
    pub fn new(workload: BasicWorkload) -> Self {
        Self::with_iterations(workload, workload.default_iterations())
    }

    /// The workload with `iterations` iterations.
    pub fn with_iterations(workload: BasicWorkload, iterations: usize) -> Self {
        Self {
            workload,
            iterations,
            db: None,
        }
    }

    /// The workload this case runs.
    pub fn workload(&self) -> BasicWorkload {
        self.workload
    }

    fn db(&self) -> Result<Arc<dyn Database>> {
        self.db
            .clone()
            .ok_or_else(|| HarnessError::InvalidCase(format!("{}: not set up", self.name())))
    }
}

fn seed_doc(i: u64) -> Document {
    Document::new(doc_id(i))
        .with_field("foo", "bar")
        .with_field("baz", "quux")
}

fn ensure_written(results: &[bench_types::WriteResult]) -> Result<()> {
    match results.iter().find(|r| !r.is_ok()) {
        Some(failed) => Err(HarnessError::Assertion(format!(
            "write of {} failed: {}",
            failed.id,
            failed.reason.as_deref().unwrap_or("unknown")
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl BenchCase for BasicCase {
    fn name(&self) -> &str {
        self.workload.name()
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    async fn setup(&mut self, ctx: &CaseContext) -> Result<()> {
        let db = ctx
            .backend
            .open(ctx.config.local_backend, &ctx.random_db_name(), 15)?;
        db.create().await?;
        self.db = Some(Arc::clone(&db));

        let seed = self.workload.seed_docs();
        if seed > 0 {
            let results = db.bulk_docs((0..seed).map(seed_doc).collect()).await?;
            ensure_written(&results)?;
            tracing::debug!("{}: seeded {} docs", self.name(), seed);
        }
        Ok(())
    }

    async fn run_iteration(&mut self, _ctx: &CaseContext, itr: usize) -> Result<()> {
        let db = self.db()?;
        match self.workload {
            BasicWorkload::BasicInserts => {
                let doc = Document::new(Uuid::new_v4().to_string()).with_field("yo", "dawg");
                let result = db.put(doc).await?;
                ensure_written(std::slice::from_ref(&result))
            }
            BasicWorkload::BulkInserts => {
                let docs = (0..100)
                    .map(|_| {
                        Document::new(Uuid::new_v4().to_string())
                            .with_field("much", "docs")
                            .with_field("very", "bulk")
                    })
                    .collect();
                ensure_written(&db.bulk_docs(docs).await?)
            }
            BasicWorkload::BasicGets => {
                db.get(&doc_id(itr as u64)).await?;
                Ok(())
            }
            BasicWorkload::AllDocsSkipLimit => {
                let queries: Vec<AllDocsQuery> = (0..QUERIES_PER_ITERATION)
                    .map(|i| AllDocsQuery::page(i * PAGE_STRIDE as usize, PAGE_SIZE))
                    .collect();
                try_join_all(queries.iter().map(|q| db.all_docs(q))).await?;
                Ok(())
            }
            BasicWorkload::AllDocsStartkeyEndkey => {
                let queries: Vec<AllDocsQuery> = (0..QUERIES_PER_ITERATION as u64)
                    .map(|i| {
                        let start = i * PAGE_STRIDE;
                        AllDocsQuery::range(doc_id(start), doc_id(start + PAGE_SIZE as u64))
                    })
                    .collect();
                try_join_all(queries.iter().map(|q| db.all_docs(q))).await?;
                Ok(())
            }
        }
    }

    async fn teardown(&mut self, _ctx: &CaseContext) -> Result<()> {
        if let Some(db) = self.db.take() {
            db.destroy().await?;
        }
        Ok(())
    }
}
