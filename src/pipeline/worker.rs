use crate::pipeline::backoff::{retry_with_backoff, RetryBackoff, RetryPolicy};
use crate::pipeline::completion::CompletionSignal;
use crate::pipeline::outcome::{AggregatorEvent, EventSender, Outcome, OutcomeStatus};
use crate::pipeline::record_queue::RecordQueue;
use crate::runtime::sink::FailureReporter;
use crate::runtime::telemetry::Telemetry;
use crate::source::page::Record;
use crate::target::client::{Registrar, RegistrationError};
use crate::target::payload::RegisterResponse;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A record that cannot be registered at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub sequence: u64,
}

impl std::fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record {} has no device token", self.sequence)
    }
}

impl std::error::Error for MalformedRecord {}

/// State every worker of a run holds a handle to.
#[derive(Clone)]
pub struct WorkerShared {
    pub queue: Arc<RecordQueue>,
    pub registrar: Arc<dyn Registrar>,
    pub reporter: Arc<dyn FailureReporter>,
    pub events: EventSender,
    pub completion: CompletionSignal,
    pub telemetry: Arc<Telemetry>,
    pub retry: RetryPolicy,
}

pub struct Worker {
    id: usize,
    shared: WorkerShared,
    processed: usize,
}

impl Worker {
    pub fn new(id: usize, shared: WorkerShared) -> Self {
        Self {
            id,
            shared,
            processed: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Records this worker turned into outcomes.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Drains the record queue until the completion signal has fired and no
    /// record is left, or until `shutdown` is cancelled.
    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::debug!("worker started");
        let queue = self.shared.queue.clone();
        let completion = self.shared.completion.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!(processed = self.processed, "worker cancelled");
                    return Ok(());
                }
                record = queue.pop() => Some(record),
                _ = completion.fired() => None,
            };

            match next {
                Some(record) => self.process(record, &shutdown).await?,
                None => break,
            }
        }

        // The source fires completion only after its last push, so whatever
        // is still queued now is the final backlog.
        while !shutdown.is_cancelled() {
            match queue.try_pop().await {
                Some(record) => self.process(record, &shutdown).await?,
                None => break,
            }
        }

        tracing::debug!(processed = self.processed, "worker drained");
        Ok(())
    }

    async fn process(&mut self, record: Record, shutdown: &CancellationToken) -> Result<()> {
        let status = self.classify(&record, shutdown).await?;
        let outcome = Outcome::new(&record, status);
        tracing::trace!(
            token = %record.id,
            sequence = record.sequence,
            status = %status,
            "record classified"
        );

        self.shared
            .events
            .send(AggregatorEvent::Outcome(outcome))
            .await
            .map_err(|_| anyhow!("outcome aggregator stopped"))?;
        self.processed += 1;
        Ok(())
    }

    async fn classify(
        &self,
        record: &Record,
        shutdown: &CancellationToken,
    ) -> Result<OutcomeStatus> {
        if !record.has_id() {
            self.shared.telemetry.record_malformed();
            let error = anyhow::Error::new(MalformedRecord {
                sequence: record.sequence,
            });
            tracing::warn!(sequence = record.sequence, "skipping record without id");
            self.shared.reporter.report(record, 0, &error);
            return Ok(OutcomeStatus::Failed);
        }

        if !record.active {
            return Ok(OutcomeStatus::Inactive);
        }

        let telemetry = &self.shared.telemetry;
        let registrar = &self.shared.registrar;
        let outcome = retry_with_backoff(
            RetryBackoff::new(self.shared.retry).with_cancellation(shutdown),
            |_attempt| {
                telemetry.record_attempt();
                let call = registrar.register(record);
                async move { call.await.and_then(ensure_accepted) }
            },
            |attempt, delay, err, will_retry| {
                match err.downcast_ref::<RegistrationError>() {
                    Some(RegistrationError::Timeout) => telemetry.record_timeout(),
                    Some(RegistrationError::Rejected { .. })
                    | Some(RegistrationError::Decode { .. }) => telemetry.record_rejection(),
                    Some(RegistrationError::Transport { .. }) | None => {
                        telemetry.record_transport_error()
                    }
                }
                if will_retry {
                    telemetry.record_retry();
                    tracing::debug!(
                        token = %record.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "registration attempt failed; retrying"
                    );
                }
            },
        )
        .await;

        match outcome.result {
            Ok(_) => Ok(OutcomeStatus::Sent),
            Err(err) if shutdown.is_cancelled() => Err(err.context(format!(
                "registration of record {} interrupted by shutdown",
                record.sequence
            ))),
            Err(err) => {
                self.shared.reporter.report(record, outcome.attempts, &err);
                Ok(OutcomeStatus::Failed)
            }
        }
    }
}

/// Turns an `Ok` response that is not the service's literal success into a
/// rejection so third-party registrars are held to the same rule.
fn ensure_accepted(response: RegisterResponse) -> Result<RegisterResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(RegistrationError::Rejected {
        status_code: response.status_code,
        status_message: response.status_message,
        payload: response.response.unwrap_or(Value::Null),
    }
    .into())
}
