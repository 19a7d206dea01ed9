//! Sequential case execution and reports.

use crate::cases::{BenchCase, CaseContext};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1e6)
}

fn all_as_millis<S: Serializer>(ds: &[Duration], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(ds.iter().map(|d| d.as_nanos() as f64 / 1e6))
}

/// Timings and outcome of one case. Durations serialize as milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Case name.
    pub name: String,
    /// Iterations requested.
    pub iterations: usize,
    /// Setup time.
    #[serde(rename = "setup_ms", serialize_with = "as_millis")]
    pub setup: Duration,
    /// One entry per completed iteration.
    #[serde(rename = "samples_ms", serialize_with = "all_as_millis")]
    pub samples: Vec<Duration>,
    /// Sum of the samples.
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,
    /// Mean sample.
    #[serde(rename = "mean_ms", serialize_with = "as_millis")]
    pub mean: Duration,
    /// Fastest sample.
    #[serde(rename = "min_ms", serialize_with = "as_millis")]
    pub min: Duration,
    /// Slowest sample.
    #[serde(rename = "max_ms", serialize_with = "as_millis")]
    pub max: Duration,
    /// Why the case failed, if it did.
    pub error: Option<String>,
}

impl CaseReport {
    /// Summarize `samples`.
    pub fn new(
        name: impl Into<String>,
        iterations: usize,
        setup: Duration,
        samples: Vec<Duration>,
        error: Option<String>,
    ) -> Self {
        let total: Duration = samples.iter().sum();
        let mean = match u32::try_from(samples.len()) {
            Ok(n) if n > 0 => total / n,
            _ => Duration::ZERO,
        };
        let min = samples.iter().min().copied().unwrap_or_default();
        let max = samples.iter().max().copied().unwrap_or_default();
        Self {
            name: name.into(),
            iterations,
            setup,
            samples,
            total,
            mean,
            min,
            max,
            error,
        }
    }

    /// True when setup, every iteration and teardown succeeded.
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Reports for one run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// One report per case, in execution order.
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    /// True when every case passed.
    pub fn passed(&self) -> bool {
        self.cases.iter().all(CaseReport::passed)
    }

    /// Number of failed cases.
    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed()).count()
    }

    /// Human-readable table, one row per case.
    pub fn render_table(&self) -> String {
        let ms = |d: Duration| format!("{:.2}", d.as_secs_f64() * 1000.0);
        let width = self
            .cases
            .iter()
            .map(|c| c.name.len())
            .chain(std::iter::once(4))
            .max()
            .unwrap_or(4);

        let mut out = String::new();
        let _ = writeln!(out, "run {}", self.run_id);
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  status",
            "case", "iters", "setup ms", "mean ms", "min ms", "max ms", "total ms"
        );
        for case in &self.cases {
            let status = match &case.error {
                None => "ok".to_string(),
                Some(e) => format!("FAILED: {}", e),
            };
            let _ = writeln!(
                out,
                "{:<width$}  {:>6}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {}",
                case.name,
                format!("{}/{}", case.samples.len(), case.iterations),
                ms(case.setup),
                ms(case.mean),
                ms(case.min),
                ms(case.max),
                ms(case.total),
                status
            );
        }
        out
    }
}

/// Runs cases one after another.
pub struct Runner {
    ctx: CaseContext,
}

impl Runner {
    /// Runner for `config`.
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            ctx: CaseContext::new(config),
        }
    }

    /// The context handed to every case.
    pub fn context(&self) -> &CaseContext {
        &self.ctx
    }

    /// Run every case and collect their reports.
    pub async fn run(&self, cases: Vec<Box<dyn BenchCase>>) -> SuiteReport {
        let run_id = Uuid::new_v4();
        tracing::info!("Run {} starting with {} cases", run_id, cases.len());

        let mut reports = Vec::with_capacity(cases.len());
        for mut case in cases {
            reports.push(self.run_case(case.as_mut()).await);
        }

        let report = SuiteReport {
            run_id,
            cases: reports,
        };
        tracing::info!(
            "Run {} finished: {} cases, {} failed",
            run_id,
            report.cases.len(),
            report.failures()
        );
        report
    }

    /// Setup, time each iteration, then tear down whatever happened.
    pub async fn run_case(&self, case: &mut dyn BenchCase) -> CaseReport {
        let name = case.name().to_string();
        let iterations = case.iterations();
        let timeout = self.ctx.config.iteration_timeout();
        tracing::info!("Case {}: setup", name);

        let mut samples = Vec::with_capacity(iterations);
        let mut error: Option<HarnessError> = None;

        let setup_started = Instant::now();
        let setup_result = case.setup(&self.ctx).await;
        let setup = setup_started.elapsed();

        match setup_result {
            Ok(()) => {
                for itr in 0..iterations {
                    let started = Instant::now();
                    match tokio::time::timeout(timeout, case.run_iteration(&self.ctx, itr)).await {
                        Ok(Ok(())) => samples.push(started.elapsed()),
                        Ok(Err(e)) => {
                            error = Some(e);
                            break;
                        }
                        Err(_) => {
                            error = Some(HarnessError::Timeout {
                                case: name.clone(),
                                iteration: itr,
                                after: timeout,
                            });
                            break;
                        }
                    }
                }
            }
            Err(e) => error = Some(e),
        }
        if let Some(e) = &error {
            tracing::error!("Case {} failed: {}", name, e);
        }

        if let Err(e) = case.teardown(&self.ctx).await {
            tracing::warn!("Case {}: teardown failed: {}", name, e);
            error.get_or_insert(e);
        }

        let report = CaseReport::new(
            name,
            iterations,
            setup,
            samples,
            error.map(|e| e.to_string()),
        );
        tracing::info!(
            "Case {}: {} iterations, mean {:?}",
            report.name,
            report.samples.len(),
            report.mean
        );
        report
    }
}
