use crate::pipeline::outcome::{AggregatorEvent, EventReceiver, Outcome, OutcomeStatus};
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressSnapshot;
use crate::runtime::sink::OutcomeLedger;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub struct AggregatorParams {
    pub events: EventReceiver,
    pub ledger: Box<dyn OutcomeLedger>,
    pub progress: watch::Sender<ProgressSnapshot>,
    pub interval: Duration,
    pub fatal: FatalErrorHandler,
}

/// Sole owner of the run's progress counters and of the outcome ledger.
///
/// Everything reaches it through one event channel; it finishes once every
/// sender (the token source and all workers) has been dropped.
pub struct OutcomeAggregator {
    events: EventReceiver,
    ledger: Box<dyn OutcomeLedger>,
    progress: watch::Sender<ProgressSnapshot>,
    interval: Duration,
    fatal: FatalErrorHandler,
    snapshot: ProgressSnapshot,
    seen: HashSet<u64>,
}

pub struct AggregatorHandle {
    handle: JoinHandle<Result<ProgressSnapshot>>,
}

impl AggregatorHandle {
    /// Waits for the final flush and returns the last snapshot.
    pub async fn join(self) -> Result<ProgressSnapshot> {
        self.handle
            .await
            .map_err(|err| anyhow!("outcome aggregator task failed: {err}"))?
    }
}

impl OutcomeAggregator {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            events: params.events,
            ledger: params.ledger,
            progress: params.progress,
            interval: params.interval,
            fatal: params.fatal,
            snapshot: ProgressSnapshot::default(),
            seen: HashSet::new(),
        }
    }

    pub fn spawn(self) -> AggregatorHandle {
        AggregatorHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    #[tracing::instrument(name = "aggregator", skip_all)]
    pub async fn run(mut self) -> Result<ProgressSnapshot> {
        match self.consume().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                if let Err(flush_err) = self.ledger.flush().await {
                    tracing::warn!(error = %flush_err, "failed to flush outcome ledger after abort");
                }
                Err(self.fatal.trigger("outcome aggregator", err))
            }
        }
    }

    async fn consume(&mut self) -> Result<ProgressSnapshot> {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event).await?,
                    None => break,
                },
                _ = ticker.tick() => self.report(),
            }
        }

        self.ledger
            .flush()
            .await
            .context("failed to flush outcome ledger")?;
        self.report();
        tracing::debug!(outcomes = self.seen.len(), "outcome aggregator drained");
        Ok(self.snapshot)
    }

    async fn apply(&mut self, event: AggregatorEvent) -> Result<()> {
        match event {
            AggregatorEvent::Totals(totals) => {
                if self.snapshot.total_expected.is_some() {
                    tracing::debug!(?totals, "ignoring totals after the first page");
                    return Ok(());
                }
                self.snapshot = self.snapshot.with_totals(totals);
            }
            AggregatorEvent::Downloaded(count) => {
                self.snapshot.downloaded += count as u64;
            }
            AggregatorEvent::Outcome(outcome) => self.record(outcome).await?,
        }
        self.progress.send_replace(self.snapshot);
        Ok(())
    }

    async fn record(&mut self, outcome: Outcome) -> Result<()> {
        if !self.seen.insert(outcome.sequence) {
            bail!(
                "duplicate outcome for record {} ({})",
                outcome.sequence,
                outcome.device_token
            );
        }

        self.ledger
            .append(&outcome)
            .await
            .with_context(|| format!("failed to record outcome for record {}", outcome.sequence))?;

        match outcome.status {
            OutcomeStatus::Sent => self.snapshot.sent += 1,
            OutcomeStatus::Inactive => self.snapshot.inactive += 1,
            OutcomeStatus::Failed => self.snapshot.failed += 1,
        }
        Ok(())
    }

    fn report(&self) {
        tracing::info!(target: "pushmigrate::progress", "{}", self.snapshot);
    }
}
