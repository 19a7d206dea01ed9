//! Run command - execute a suite and report timings.

use anyhow::{Context, Result};
use bench_harness::{filter_cases, skimdb_case, BenchCase, HarnessConfig, Runner, Suite, SuiteReport};
use std::path::{Path, PathBuf};

/// What to run.
#[derive(Debug)]
pub struct RunOptions {
    /// Suite to run.
    pub suite: Suite,
    /// Name filter.
    pub grep: Option<String>,
    /// JSON report destination.
    pub json: Option<PathBuf>,
    /// Extra external-source case.
    pub skimdb: Option<String>,
}

/// Cases selected by `options`.
pub fn select_cases(options: &RunOptions) -> Result<Vec<Box<dyn BenchCase>>> {
    let mut cases = options.suite.cases()?;
    if let Some(url) = &options.skimdb {
        cases.push(skimdb_case(url)?);
    }
    Ok(filter_cases(cases, options.grep.as_deref()))
}

/// Run the command. Fails when any case failed.
pub async fn run(config: HarnessConfig, options: RunOptions) -> Result<()> {
    let cases = select_cases(&options)?;
    if cases.is_empty() {
        anyhow::bail!("No cases match suite '{}'", options.suite);
    }

    tracing::info!("Benchmarking against {}", config.couch_host);
    let report = Runner::new(config).run(cases).await;
    print!("{}", report.render_table());

    if let Some(path) = &options.json {
        write_report(&report, path).await?;
        println!("Report written to {}", path.display());
    }

    if !report.passed() {
        anyhow::bail!("{} of {} cases failed", report.failures(), report.cases.len());
    }
    Ok(())
}

async fn write_report(report: &SuiteReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
