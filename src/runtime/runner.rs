use crate::{MigrationConfig, MigrationReport, Migrator};
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`Migrator`] to completion, optionally bounded by a timeout or an
/// OS signal.
pub struct Runner {
    migrator: Migrator,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a runner over the HTTP-backed migrator and wires a root
    /// [`CancellationToken`] through the whole pipeline.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        Ok(Self::from_migrator(Migrator::new(config)?))
    }

    pub fn from_migrator(migrator: Migrator) -> Self {
        let shutdown = migrator.shutdown_token();
        Self { migrator, shutdown }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub async fn run(self) -> Result<MigrationReport> {
        self.migrator.run().await
    }

    /// Runs the migration, cancelling it if it has not finished within `limit`.
    ///
    /// Every stage is still joined before the timeout error is returned.
    pub async fn run_with_timeout(self, limit: Duration) -> Result<MigrationReport> {
        self.run_until(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!(?limit, "migration timed out; shutting down");
        })
        .await
        .map_err(|err| err.context(format!("migration did not finish within {limit:?}")))
    }

    /// Runs until the migration completes or a Ctrl-C (SIGINT) is received.
    pub async fn run_until_ctrl_c(self) -> Result<MigrationReport> {
        self.run_until(async {
            match signal::ctrl_c().await {
                Ok(()) => tracing::info!("Ctrl-C received; shutting down migration"),
                Err(err) => {
                    tracing::warn!(error = %err, "unable to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    async fn run_until<F>(self, stop: F) -> Result<MigrationReport>
    where
        F: Future<Output = ()>,
    {
        let shutdown = self.shutdown.clone();
        let wait = self.migrator.start().wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result,
            _ = stop => {
                shutdown.cancel();
                wait.await
            }
        }
    }
}
