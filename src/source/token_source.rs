//! Producer half of the pipeline: walks the registry page by page, feeds the
//! shared record queue, and fires the completion signal once the cursor chain
//! ends.

use crate::pipeline::completion::CompletionSignal;
use crate::pipeline::outcome::{AggregatorEvent, EventSender};
use crate::pipeline::record_queue::RecordQueue;
use crate::runtime::sink::DumpSink;
use crate::runtime::telemetry::Telemetry;
use crate::source::client::PageSource;
use crate::source::page::{Cursor, Record, Totals};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the producer saw over a complete run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSummary {
    pub pages: usize,
    pub records: u64,
    pub totals: Option<Totals>,
}

pub struct TokenSource {
    source: Arc<dyn PageSource>,
    dump: Arc<dyn DumpSink>,
    queue: Arc<RecordQueue>,
    events: EventSender,
    completion: CompletionSignal,
    telemetry: Arc<Telemetry>,
    initial: Cursor,
}

pub struct TokenSourceParams {
    pub source: Arc<dyn PageSource>,
    pub dump: Arc<dyn DumpSink>,
    pub queue: Arc<RecordQueue>,
    pub events: EventSender,
    pub completion: CompletionSignal,
    pub telemetry: Arc<Telemetry>,
    pub initial: Cursor,
}

impl TokenSource {
    pub fn new(params: TokenSourceParams) -> Self {
        Self {
            source: params.source,
            dump: params.dump,
            queue: params.queue,
            events: params.events,
            completion: params.completion,
            telemetry: params.telemetry,
            initial: params.initial,
        }
    }

    /// Streams every page into the record queue.
    ///
    /// Any fetch, decode, or dump failure aborts the stream without firing the
    /// completion signal: a broken cursor chain cannot be trusted to be
    /// exhaustive.
    #[tracing::instrument(name = "token_source", skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<SourceSummary> {
        tracing::info!(cursor = ?self.initial, "token source started");

        let mut cursor = Some(self.initial.clone());
        let mut summary = SourceSummary::default();
        let mut fetched: Vec<Record> = Vec::new();

        while let Some(current) = cursor.take() {
            let fetched_page = tokio::select! {
                _ = shutdown.cancelled() => bail!("token source cancelled"),
                page = self.source.fetch_page(&current) => page,
            };
            let page = fetched_page
                .with_context(|| format!("failed to fetch registry page {}", summary.pages))?;
            self.telemetry.record_page();

            if summary.totals.is_none() {
                if let Some(totals) = page.totals() {
                    summary.totals = Some(totals);
                    self.emit(AggregatorEvent::Totals(totals)).await?;
                    tracing::info!(
                        total = totals.total,
                        active = totals.active,
                        "registry totals latched"
                    );
                }
            }

            self.dump
                .write_page(fetched.len(), &page)
                .await
                .with_context(|| format!("failed to dump registry page {}", summary.pages))?;

            let records = page.to_records(summary.records);
            let count = records.len();
            summary.pages += 1;
            summary.records += count as u64;
            self.emit(AggregatorEvent::Downloaded(count)).await?;

            for record in &records {
                tokio::select! {
                    _ = shutdown.cancelled() => bail!("token source cancelled"),
                    _ = self.queue.push(record.clone()) => {}
                }
            }

            tracing::debug!(
                page = summary.pages,
                records = count,
                downloaded = summary.records,
                "registry page enqueued"
            );

            fetched.extend(records);
            cursor = page.next_cursor();
        }

        self.dump
            .write_all(&fetched)
            .await
            .context("failed to write aggregate registry dump")?;

        self.completion.fire();
        tracing::info!(
            pages = summary.pages,
            records = summary.records,
            "registry exhausted; completion signalled"
        );

        Ok(summary)
    }

    async fn emit(&self, event: AggregatorEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("outcome aggregator stopped before the token source"))
    }
}
