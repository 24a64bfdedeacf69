//! Migration orchestration.
//!
//! `Migrator` wires one run of the pipeline together:
//! - the token source pages through the registry into the record queue,
//! - the worker pool drains the queue and registers active records,
//! - the outcome aggregator owns progress and the ledger,
//! - the completion coordinator joins all of them.
//!
//! Collaborators (page source, registrar, sinks) are trait objects so the
//! same wiring runs against the HTTP clients or against test doubles.

use crate::pipeline::aggregator::{AggregatorParams, OutcomeAggregator};
use crate::pipeline::completion::{
    CompletionCoordinator, CompletionParts, CompletionSignal, MigrationReport,
};
use crate::pipeline::outcome::event_channel;
use crate::pipeline::record_queue::RecordQueue;
use crate::pipeline::worker::WorkerShared;
use crate::pipeline::worker_pool::WorkerPool;
use crate::runtime::config::MigrationConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressSnapshot;
use crate::runtime::sink::{
    DumpSink, FailureReporter, FsDumpSink, JsonLinesLedger, LogFailureReporter, OutcomeLedger,
};
use crate::runtime::telemetry::Telemetry;
use crate::source::client::{HttpPageSource, PageSource};
use crate::source::token_source::{TokenSource, TokenSourceParams};
use crate::target::client::{HttpRegistrar, Registrar};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Persistence collaborators for one run.
pub struct MigrationSinks {
    pub dump: Arc<dyn DumpSink>,
    pub ledger: Box<dyn OutcomeLedger>,
    pub reporter: Arc<dyn FailureReporter>,
}

impl MigrationSinks {
    /// Page dumps and the JSON-lines ledger under `dir`, failures to the log.
    pub fn filesystem(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            dump: Arc::new(FsDumpSink::new(dir)),
            ledger: Box::new(JsonLinesLedger::in_dir(dir)),
            reporter: Arc::new(LogFailureReporter),
        }
    }
}

pub struct Migrator {
    config: MigrationConfig,
    source: Arc<dyn PageSource>,
    registrar: Arc<dyn Registrar>,
    sinks: MigrationSinks,
    telemetry: Arc<Telemetry>,
    progress: watch::Sender<ProgressSnapshot>,
    shutdown_root: CancellationToken,
}

impl Migrator {
    /// Builds a migrator talking HTTP to both services and persisting under
    /// the configured dump directory.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        let source = Arc::new(HttpPageSource::from_config(&config)?);
        let registrar = Arc::new(HttpRegistrar::from_config(&config)?);
        let sinks = MigrationSinks::filesystem(config.dump_dir());
        Ok(Self::with_components(config, source, registrar, sinks))
    }

    pub fn with_components(
        config: MigrationConfig,
        source: Arc<dyn PageSource>,
        registrar: Arc<dyn Registrar>,
        sinks: MigrationSinks,
    ) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            config,
            source,
            registrar,
            sinks,
            telemetry: Arc::new(Telemetry::default()),
            progress,
            shutdown_root: CancellationToken::new(),
        }
    }

    /// Ties the run to an external shutdown token; cancelling it aborts the run.
    pub fn with_cancellation_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown_root = shutdown;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Receiver of every snapshot the aggregator publishes.
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    /// Spawns every stage and hands back the coordinator that joins them.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> CompletionCoordinator {
        let Self {
            config,
            source,
            registrar,
            sinks,
            telemetry,
            progress,
            shutdown_root,
        } = self;

        let run_token = shutdown_root.child_token();
        let fatal = FatalErrorHandler::new(run_token.clone());
        let queue = Arc::new(RecordQueue::with_capacity(config.queue_capacity()));
        let completion = CompletionSignal::new();
        let (events_tx, events_rx) = event_channel(config.queue_capacity());

        tracing::info!(
            source = config.source_url(),
            target = config.target_url(),
            workers = config.worker_count(),
            dump_dir = %config.dump_dir().display(),
            "starting migration"
        );

        let aggregator = OutcomeAggregator::new(AggregatorParams {
            events: events_rx,
            ledger: sinks.ledger,
            progress,
            interval: config.progress_interval(),
            fatal: fatal.clone(),
        })
        .spawn();

        let token_source = TokenSource::new(TokenSourceParams {
            source,
            dump: sinks.dump,
            queue: queue.clone(),
            events: events_tx.clone(),
            completion: completion.clone(),
            telemetry: telemetry.clone(),
            initial: config.initial_cursor(),
        });
        let source_handle = tokio::spawn(token_source.run(run_token.clone()));

        // The pool owns the last sender; once every worker exits the
        // aggregator sees a closed channel and flushes.
        let workers = WorkerPool::launch(
            config.worker_count(),
            WorkerShared {
                queue,
                registrar,
                reporter: sinks.reporter,
                events: events_tx,
                completion: completion.clone(),
                telemetry: telemetry.clone(),
                retry: config.retry_policy(),
            },
            run_token.clone(),
            fatal.clone(),
        );

        CompletionCoordinator::new(CompletionParts {
            source: source_handle,
            workers,
            aggregator,
            completion,
            fatal,
            run_token,
            telemetry,
        })
    }

    /// Runs the migration to completion.
    pub async fn run(self) -> Result<MigrationReport> {
        self.start().wait().await
    }
}
