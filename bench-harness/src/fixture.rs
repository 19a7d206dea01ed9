//! Generation-based document fixtures.
//!
//! A fixture is `num_docs` documents (`doc_0000000000`, `doc_0000000001`, ...)
//! with random `foo`/`bar` values, rewritten once per extra generation so
//! each document ends at revision generation `generations`. A generation
//! starts only after every write of the previous one has completed.

use crate::error::{HarnessError, Result};
use bench_client::Database;
use bench_types::{doc_id, Document, WriteResult};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use serde_json::json;
use std::time::{Duration, Instant};

/// How generations after the first are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// One bulk write per generation, reusing the revisions of the last one.
    #[default]
    Bulk,
    /// Fetch and put every document, up to `concurrency` at a time.
    FetchRewrite {
        /// Maximum in-flight documents.
        concurrency: usize,
    },
}

/// What to build.
#[derive(Debug, Clone)]
pub struct FixtureSpec {
    /// Number of documents.
    pub num_docs: u64,
    /// Writes per document; must be at least 1.
    pub generations: u32,
    /// How later generations are written.
    pub strategy: GenerationStrategy,
}

impl FixtureSpec {
    /// `num_docs` documents written `generations` times in bulk.
    pub fn new(num_docs: u64, generations: u32) -> Self {
        Self {
            num_docs,
            generations,
            strategy: GenerationStrategy::Bulk,
        }
    }

    /// Use `strategy` for later generations.
    pub fn with_strategy(mut self, strategy: GenerationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.generations == 0 {
            return Err(HarnessError::InvalidCase("generations must be > 0".into()));
        }
        if let GenerationStrategy::FetchRewrite { concurrency: 0 } = self.strategy {
            return Err(HarnessError::InvalidCase(
                "fetch-rewrite concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`build_fixture`].
#[derive(Debug, Clone)]
pub struct FixtureReport {
    /// Documents written.
    pub docs: u64,
    /// Generations written.
    pub generations: u32,
    /// Time spent.
    pub elapsed: Duration,
}

/// Populate `db` according to `spec`.
///
/// # Errors
///
/// Fails on the first rejected document write or database error.
pub async fn build_fixture<R>(db: &dyn Database, spec: &FixtureSpec, rng: &mut R) -> Result<FixtureReport>
where
    R: Rng + Send + ?Sized,
{
    spec.validate()?;
    let started = Instant::now();

    let docs: Vec<Document> = (0..spec.num_docs)
        .map(|i| Document::bench(doc_id(i), &mut *rng))
        .collect();
    let mut results = write_bulk(db, docs).await?;
    tracing::debug!("Fixture {}: generation 1 written", db.name());

    for generation in 2..=spec.generations {
        results = match spec.strategy {
            GenerationStrategy::Bulk => {
                let docs = results
                    .into_iter()
                    .map(|r| rewrite(r, &mut *rng))
                    .collect::<Result<Vec<_>>>()?;
                write_bulk(db, docs).await?
            }
            GenerationStrategy::FetchRewrite { concurrency } => {
                let values: Vec<(String, f64, f64)> = results
                    .into_iter()
                    .map(|r| (r.id, rng.gen(), rng.gen()))
                    .collect();
                fetch_rewrite(db, values, concurrency).await?
            }
        };
        tracing::debug!("Fixture {}: generation {} written", db.name(), generation);
    }

    let report = FixtureReport {
        docs: spec.num_docs,
        generations: spec.generations,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "Fixture {} ready: {} docs x {} generations in {:?}",
        db.name(),
        report.docs,
        report.generations,
        report.elapsed
    );
    Ok(report)
}

/// Next generation of a written document, with fresh values.
fn rewrite<R: Rng + ?Sized>(result: WriteResult, rng: &mut R) -> Result<Document> {
    let rev = result
        .rev
        .ok_or_else(|| HarnessError::Fixture(format!("{}: write returned no revision", result.id)))?;
    Ok(Document::bench(result.id, rng).with_rev(rev))
}

fn check(results: Vec<WriteResult>) -> Result<Vec<WriteResult>> {
    if let Some(failed) = results.iter().find(|r| !r.is_ok()) {
        return Err(HarnessError::Fixture(format!(
            "{}: {} ({})",
            failed.id,
            failed.error.as_deref().unwrap_or("error"),
            failed.reason.as_deref().unwrap_or("no reason")
        )));
    }
    Ok(results)
}

async fn write_bulk(db: &dyn Database, docs: Vec<Document>) -> Result<Vec<WriteResult>> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    check(db.bulk_docs(docs).await?)
}

async fn fetch_rewrite(
    db: &dyn Database,
    values: Vec<(String, f64, f64)>,
    concurrency: usize,
) -> Result<Vec<WriteResult>> {
    let results: Vec<WriteResult> = stream::iter(values)
        .map(|(id, foo, bar)| async move {
            let mut doc = db.get(&id).await?;
            doc.body.insert("foo".into(), json!(foo));
            doc.body.insert("bar".into(), json!(bar));
            Ok::<_, HarnessError>(db.put(doc).await?)
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;
    check(results)
}
