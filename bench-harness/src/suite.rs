//! Predefined case lists.

use crate::cases::{BasicCase, BasicWorkload, BenchCase, PullReplicationCase, PullReplicationConfig};
use crate::error::{HarnessError, Result};
use std::fmt;
use std::str::FromStr;

/// A named group of cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// Pull replication through the latency proxy.
    Replication,
    /// Single-database workloads.
    Basics,
    /// Both of the above.
    All,
}

impl Suite {
    /// Build the cases of this suite.
    ///
    /// # Errors
    ///
    /// Returns an error if a predefined case is misconfigured.
    pub fn cases(&self) -> Result<Vec<Box<dyn BenchCase>>> {
        match self {
            Suite::Replication => replication_suite(),
            Suite::Basics => Ok(basics_suite()),
            Suite::All => {
                let mut cases = replication_suite()?;
                cases.extend(basics_suite());
                Ok(cases)
            }
        }
    }
}

impl FromStr for Suite {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replication" => Ok(Suite::Replication),
            "basics" => Ok(Suite::Basics),
            "all" => Ok(Suite::All),
            other => Err(HarnessError::InvalidCase(format!(
                "unknown suite '{}' (expected replication, basics or all)",
                other
            ))),
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Suite::Replication => "replication",
            Suite::Basics => "basics",
            Suite::All => "all",
        };
        f.write_str(name)
    }
}

/// Pull replication of ten documents with one and with two generations.
///
/// # Errors
///
/// Returns an error if a case is misconfigured.
pub fn replication_suite() -> Result<Vec<Box<dyn BenchCase>>> {
    let one = PullReplicationConfig::new("pull-replication-perf-one-generation");
    let mut two = PullReplicationConfig::new("pull-replication-perf-two-generations");
    two.generations = 2;

    Ok(vec![
        Box::new(PullReplicationCase::new(one)?),
        Box::new(PullReplicationCase::new(two)?),
    ])
}

/// Every [`BasicWorkload`] with its usual iteration count.
pub fn basics_suite() -> Vec<Box<dyn BenchCase>> {
    BasicWorkload::ALL
        .into_iter()
        .map(|w| Box::new(BasicCase::new(w)) as Box<dyn BenchCase>)
        .collect()
}

/// Replicate the first 200 documents of an existing database at `url`.
///
/// # Errors
///
/// Returns an error if the case is misconfigured.
pub fn skimdb_case(url: &str) -> Result<Box<dyn BenchCase>> {
    let mut config = PullReplicationConfig::new("pull-replication-perf-skimdb");
    config.source_url = Some(url.to_string());
    config.added_latency_ms = None;
    config.stop_after_docs = Some(200);
    Ok(Box::new(PullReplicationCase::new(config)?))
}

/// Keep the cases whose name contains `pattern`; `None` keeps all.
pub fn filter_cases(cases: Vec<Box<dyn BenchCase>>, pattern: Option<&str>) -> Vec<Box<dyn BenchCase>> {
    match pattern {
        Some(pattern) => cases
            .into_iter()
            .filter(|case| case.name().contains(pattern))
            .collect(),
        None => cases,
    }
}
