//! End-of-run plumbing: the one-shot [`CompletionSignal`] fired by the token
//! source and the [`CompletionCoordinator`] that joins every stage.

use crate::pipeline::aggregator::AggregatorHandle;
use crate::pipeline::worker_pool::{WorkerPool, WorkerReport};
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressSnapshot;
use crate::runtime::telemetry::{Telemetry, TelemetrySnapshot};
use crate::source::token_source::SourceSummary;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// "No further records will ever be enqueued."
///
/// Broadcast rather than consumed: every clone observes the same latch, and
/// firing more than once has no further effect.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    latch: CancellationToken,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.latch.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.latch.is_cancelled()
    }

    /// Resolves once [`fire`](Self::fire) has been called on any clone.
    pub async fn fired(&self) {
        self.latch.cancelled().await
    }
}

/// Result of a migration that ran to completion.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub source: SourceSummary,
    pub progress: ProgressSnapshot,
    pub workers: Vec<WorkerReport>,
    pub telemetry: TelemetrySnapshot,
}

pub(crate) struct CompletionParts {
    pub source: JoinHandle<Result<SourceSummary>>,
    pub workers: WorkerPool,
    pub aggregator: AggregatorHandle,
    pub completion: CompletionSignal,
    pub fatal: FatalErrorHandler,
    pub run_token: CancellationToken,
    pub telemetry: Arc<Telemetry>,
}

/// Joins the source, every worker, and the aggregator's final flush.
///
/// [`wait`](Self::wait) consumes the coordinator, so the caller is released
/// exactly once.
pub struct CompletionCoordinator {
    parts: CompletionParts,
}

impl CompletionCoordinator {
    pub(crate) fn new(parts: CompletionParts) -> Self {
        Self { parts }
    }

    pub fn completion(&self) -> CompletionSignal {
        self.parts.completion.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.parts.run_token.clone()
    }

    pub async fn wait(self) -> Result<MigrationReport> {
        let CompletionParts {
            source,
            workers,
            aggregator,
            completion,
            fatal,
            run_token,
            telemetry,
        } = self.parts;

        let source = match source.await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(err)) => {
                fatal.trigger("token source", err);
                None
            }
            Err(join_err) => {
                fatal.trigger(
                    "token source",
                    anyhow!("token source task failed: {join_err}"),
                );
                None
            }
        };

        let workers = workers.join().await;
        tracing::debug!(workers = workers.len(), "registration workers joined");

        let progress = match aggregator.join().await {
            Ok(progress) => Some(progress),
            Err(err) => {
                fatal.trigger("outcome aggregator", err);
                None
            }
        };

        if let Some(err) = fatal.error() {
            return Err(err).context("migration aborted");
        }
        if run_token.is_cancelled() {
            bail!("migration cancelled before completion");
        }

        let source = source.context("token source finished without a summary")?;
        let progress = progress.context("outcome aggregator finished without a snapshot")?;
        if !completion.is_fired() {
            bail!("token source returned without signalling completion");
        }
        if progress.processed() != source.records {
            bail!(
                "outcome count mismatch: {} records fetched, {} outcomes recorded",
                source.records,
                progress.processed()
            );
        }

        tracing::info!(
            records = source.records,
            sent = progress.sent,
            inactive = progress.inactive,
            failed = progress.failed,
            "migration complete"
        );

        Ok(MigrationReport {
            source,
            progress,
            workers,
            telemetry: telemetry.snapshot(),
        })
    }
}
