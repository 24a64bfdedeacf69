//! Fixed-size pool of registration workers.
//!
//! Each worker runs in its own task behind `catch_unwind`; an error or panic
//! is escalated through the [`FatalErrorHandler`], which cancels the run.

use crate::pipeline::worker::{Worker, WorkerShared};
use crate::runtime::fatal::FatalErrorHandler;
use futures::FutureExt;
use std::any::Any;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Drained,
    Cancelled,
    Failed(String),
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub processed: usize,
    pub exit: WorkerExit,
}

pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    pub(crate) fn launch(
        worker_count: usize,
        shared: WorkerShared,
        run_token: CancellationToken,
        fatal_handler: FatalErrorHandler,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let mut worker = Worker::new(worker_id, shared.clone());
            let worker_shutdown = run_token.clone();
            let fatal_handler = fatal_handler.clone();

            workers.push(tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(worker.run(worker_shutdown.clone()))
                    .catch_unwind()
                    .await;

                let exit = match result {
                    Ok(Ok(())) if worker_shutdown.is_cancelled() => WorkerExit::Cancelled,
                    Ok(Ok(())) => WorkerExit::Drained,
                    Ok(Err(err)) if worker_shutdown.is_cancelled() => {
                        tracing::debug!(
                            worker = worker_id,
                            error = %err,
                            "worker stopped by shutdown"
                        );
                        WorkerExit::Cancelled
                    }
                    Ok(Err(err)) => {
                        tracing::error!(
                            worker = worker_id,
                            error = %err,
                            "worker task exited with error"
                        );
                        let message = format!("{err:#}");
                        fatal_handler.trigger(
                            "registration worker",
                            err.context(format!("worker {worker_id} exited with error")),
                        );
                        WorkerExit::Failed(message)
                    }
                    Err(panic_payload) => {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        fatal_handler.trigger(
                            "registration worker",
                            anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}"),
                        );
                        WorkerExit::Panicked(panic_msg)
                    }
                };

                WorkerReport {
                    id: worker_id,
                    processed: worker.processed(),
                    exit,
                }
            }));
        }

        tracing::info!(workers = worker_count, "registration workers launched");
        Self { workers }
    }

    /// Waits for every worker, in id order.
    pub(crate) async fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.workers.len());
        for (worker_id, handle) in self.workers.into_iter().enumerate() {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => WorkerReport {
                    id: worker_id,
                    processed: 0,
                    exit: WorkerExit::Panicked(err.to_string()),
                },
            };
            reports.push(report);
        }
        reports
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
