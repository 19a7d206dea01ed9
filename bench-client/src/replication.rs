//! One-shot pull replication.
//!
//! [`replicate`] copies every document revision the target is missing from
//! the source, batch by batch, following the source's changes feed:
//!
//! ```text
//! source._changes ──► target._revs_diff ──► source GET ?rev (concurrent)
//!        ▲                                            │
//!        └──────── next batch ◄── target._bulk_docs (new_edits=false)
//! ```
//!
//! The run is non-live: it stops when the feed is exhausted. Progress is
//! reported on an event channel; exactly one terminal event
//! ([`ReplicationEvent::Complete`] or [`ReplicationEvent::Error`]) is sent.

use crate::database::Database;
use crate::error::DbError;
use bench_types::{Document, Seq};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Options for a replication run.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Number of changes processed per batch.
    pub batch_size: usize,
    /// Maximum concurrent revision fetches from the source.
    pub max_concurrency: usize,
    /// Stop (as cancelled) once this many documents have been written.
    pub stop_after_docs: Option<u64>,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 15,
            stop_after_docs: None,
        }
    }
}

/// How a replication run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    /// The changes feed was exhausted.
    Complete,
    /// Stopped early by [`Replication::cancel`] or `stop_after_docs`.
    Cancelled,
}

/// Cumulative progress, sent after every batch.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeInfo {
    /// Revisions fetched from the source so far.
    pub docs_read: u64,
    /// Revisions stored on the target so far.
    pub docs_written: u64,
    /// Revisions the target rejected so far.
    pub doc_write_failures: u64,
    /// Documents in the batch that produced this event.
    pub batch_docs: usize,
    /// Source sequence reached.
    pub last_seq: Seq,
}

/// Final result of a replication run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationSummary {
    /// True when no document failed to write.
    pub ok: bool,
    /// How the run ended.
    pub status: ReplicationStatus,
    /// Revisions fetched from the source.
    pub docs_read: u64,
    /// Revisions stored on the target.
    pub docs_written: u64,
    /// Revisions the target rejected.
    pub doc_write_failures: u64,
    /// Batches processed.
    pub batches: u64,
    /// Source sequence reached.
    pub last_seq: Seq,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Events emitted while a replication runs.
#[derive(Debug, Clone)]
pub enum ReplicationEvent {
    /// A batch was written.
    Change(ChangeInfo),
    /// The run finished.
    Complete(ReplicationSummary),
    /// The run failed.
    Error(String),
}

/// Errors that abort a replication run.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Reading from the source failed.
    #[error("source error: {0}")]
    Source(#[source] DbError),

    /// Writing to or querying the target failed.
    #[error("target error: {0}")]
    Target(#[source] DbError),

    /// Options cannot be used.
    #[error("invalid replication options: {0}")]
    InvalidOptions(String),

    /// The replication task panicked or was aborted.
    #[error("replication task aborted: {0}")]
    Aborted(String),
}

/// Handle to a running replication.
///
/// Dropping the handle aborts the run; no writes happen after the drop.
pub struct Replication {
    events: mpsc::UnboundedReceiver<ReplicationEvent>,
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<ReplicationSummary, ReplicationError>>>,
}

impl Replication {
    /// Wait for the next event. Returns `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<ReplicationEvent> {
        self.events.recv().await
    }

    /// Ask the run to stop after the batch in flight.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Drain remaining events and wait for the final result.
    pub async fn finish(mut self) -> Result<ReplicationSummary, ReplicationError> {
        while self.events.recv().await.is_some() {}
        let task = self
            .task
            .take()
            .ok_or_else(|| ReplicationError::Aborted("already finished".into()))?;
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ReplicationError::Aborted(e.to_string())),
        }
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!("Replication handle dropped, aborting run");
            task.abort();
        }
    }
}

/// Start a one-shot pull replication from `source` to `target`.
///
/// Must be called from within a tokio runtime.
pub fn replicate(
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    options: ReplicationOptions,
) -> Replication {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let result = run(source, target, options, &events_tx, cancel_rx).await;
        match &result {
            Ok(summary) => {
                let _ = events_tx.send(ReplicationEvent::Complete(summary.clone()));
            }
            Err(e) => {
                tracing::warn!("Replication failed: {}", e);
                let _ = events_tx.send(ReplicationEvent::Error(e.to_string()));
            }
        }
        result
    });

    Replication {
        events,
        cancel_tx,
        task: Some(task),
    }
}

async fn run(
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    options: ReplicationOptions,
    events: &mpsc::UnboundedSender<ReplicationEvent>,
    cancel: watch::Receiver<bool>,
) -> Result<ReplicationSummary, ReplicationError> {
    if options.batch_size == 0 {
        return Err(ReplicationError::InvalidOptions("batch_size must be > 0".into()));
    }
    if options.max_concurrency == 0 {
        return Err(ReplicationError::InvalidOptions(
            "max_concurrency must be > 0".into(),
        ));
    }

    let started = Instant::now();
    tracing::info!(
        "Replication {} -> {} started (batch_size: {})",
        source.name(),
        target.name(),
        options.batch_size
    );

    let mut since = Seq::zero();
    let mut status = ReplicationStatus::Complete;
    let mut docs_read = 0u64;
    let mut docs_written = 0u64;
    let mut doc_write_failures = 0u64;
    let mut batches = 0u64;

    loop {
        if *cancel.borrow() {
            status = ReplicationStatus::Cancelled;
            break;
        }

        let page = source
            .changes(&since, options.batch_size)
            .await
            .map_err(ReplicationError::Source)?;
        let page_len = page.results.len();
        if page_len == 0 {
            since = page.last_seq;
            break;
        }

        let wanted: BTreeMap<String, Vec<String>> = page
            .results
            .iter()
            .map(|row| (row.id.clone(), row.revs()))
            .collect();
        let missing = target
            .revs_diff(wanted)
            .await
            .map_err(ReplicationError::Target)?;

        let fetches: Vec<(String, String)> = missing
            .into_iter()
            .flat_map(|(id, revs)| revs.into_iter().map(move |rev| (id.clone(), rev)))
            .collect();
        let docs: Vec<Document> = stream::iter(fetches)
            .map(|(id, rev)| {
                let source = Arc::clone(&source);
                async move { source.get_revision(&id, &rev).await }
            })
            .buffer_unordered(options.max_concurrency)
            .try_collect()
            .await
            .map_err(ReplicationError::Source)?;

        let batch_docs = docs.len();
        docs_read += batch_docs as u64;
        let failures = if docs.is_empty() {
            Vec::new()
        } else {
            target
                .bulk_docs_replicated(docs)
                .await
                .map_err(ReplicationError::Target)?
        };
        for failure in &failures {
            tracing::warn!(
                "Replication write failed for {}: {}",
                failure.id,
                failure.reason.as_deref().unwrap_or("unknown")
            );
        }
        docs_written += (batch_docs - failures.len().min(batch_docs)) as u64;
        doc_write_failures += failures.len() as u64;
        batches += 1;
        since = page.last_seq;

        tracing::debug!(
            "Replication batch {}: {} changes, {} docs written (total {})",
            batches,
            page_len,
            batch_docs,
            docs_written
        );
        let _ = events.send(ReplicationEvent::Change(ChangeInfo {
            docs_read,
            docs_written,
            doc_write_failures,
            batch_docs,
            last_seq: since.clone(),
        }));

        if options
            .stop_after_docs
            .is_some_and(|limit| docs_written >= limit)
        {
            status = ReplicationStatus::Cancelled;
            break;
        }
        if page_len < options.batch_size {
            break;
        }
    }

    let summary = ReplicationSummary {
        ok: doc_write_failures == 0,
        status,
        docs_read,
        docs_written,
        doc_write_failures,
        batches,
        last_seq: since,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "Replication {} -> {} {:?}: {} docs written in {:?}",
        source.name(),
        target.name(),
        summary.status,
        summary.docs_written,
        summary.elapsed
    );
    Ok(summary)
}
