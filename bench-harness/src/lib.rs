//! # bench-harness
//!
//! Benchmark cases, fixtures and the sequential runner for docbench.
//!
//! A run is a list of [`BenchCase`]s executed one after another:
//!
//! ```text
//! for case in cases:
//!     setup ──► iteration 0..n (each under a timeout) ──► teardown (always)
//! ```
//!
//! The replication cases build a remote fixture, optionally put the
//! latency proxy in front of it, and time one-shot pull replications into
//! fresh local databases. The basic cases time single-database operations.
//!
//! ## Modules
//!
//! - [`config`]: harness configuration and `COUCH_HOST` resolution
//! - [`backend`]: opening local and remote databases
//! - [`fixture`]: generation-based document fixtures
//! - [`cases`]: the [`BenchCase`] trait and its implementations
//! - [`suite`]: the predefined case lists
//! - [`runner`]: execution, timing and reports

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cases;
pub mod config;
pub mod error;
pub mod fixture;
pub mod runner;
pub mod suite;

pub use backend::Backend;
pub use cases::{
    BasicCase, BasicWorkload, BenchCase, CaseContext, PullReplicationCase, PullReplicationConfig,
};
pub use config::{resolve_couch_host, BackendKind, ConfigError, HarnessConfig};
pub use error::{HarnessError, Result};
pub use fixture::{build_fixture, FixtureReport, FixtureSpec, GenerationStrategy};
pub use runner::{CaseReport, Runner, SuiteReport};
pub use suite::{basics_suite, filter_cases, replication_suite, skimdb_case, Suite};
