//! Persistence collaborators injected into the pipeline: raw page dumps, the
//! outcome ledger, and the failure reporter. Filesystem-backed defaults live
//! next to in-memory versions used by tests and embedding callers.

use crate::pipeline::outcome::Outcome;
use crate::source::page::{Page, Record};
use crate::target::client::RegistrationError;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Stores raw registry pages and the aggregate list of fetched records.
pub trait DumpSink: Send + Sync {
    /// `offset` is the number of records fetched before this page.
    fn write_page<'a>(&'a self, offset: usize, page: &'a Page) -> BoxFuture<'a, Result<()>>;
    fn write_all<'a>(&'a self, records: &'a [Record]) -> BoxFuture<'a, Result<()>>;
}

/// Append-only record of outcomes. Owned by the aggregator alone.
pub trait OutcomeLedger: Send {
    fn append<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, Result<()>>;
    fn flush(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Receives records whose registration budget ran out.
pub trait FailureReporter: Send + Sync {
    fn report(&self, record: &Record, attempts: usize, error: &anyhow::Error);
}

const PAGE_DIR: &str = "source";
const PAGE_FILE: &str = "device_tokens.json";
const AGGREGATE_FILE: &str = "source.json";
const LEDGER_FILE: &str = "ledger.jsonl";

#[derive(Debug, Clone)]
pub struct FsDumpSink {
    root: PathBuf,
}

impl FsDumpSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_path(&self, offset: usize) -> PathBuf {
        self.root
            .join(PAGE_DIR)
            .join(offset.to_string())
            .join(PAGE_FILE)
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.root.join(AGGREGATE_FILE)
    }
}

impl DumpSink for FsDumpSink {
    fn write_page<'a>(&'a self, offset: usize, page: &'a Page) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.page_path(offset);
            let body = serde_json::to_vec_pretty(page).context("failed to encode page dump")?;
            write_file(&path, &body).await
        })
    }

    fn write_all<'a>(&'a self, records: &'a [Record]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.aggregate_path();
            let body =
                serde_json::to_vec_pretty(records).context("failed to encode aggregate dump")?;
            write_file(&path, &body).await
        })
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDumpSink;

impl DumpSink for NoopDumpSink {
    fn write_page<'a>(&'a self, _offset: usize, _page: &'a Page) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn write_all<'a>(&'a self, _records: &'a [Record]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Writes one JSON object per outcome, each line flushed before `append`
/// returns. The file is created on first use so an empty run still leaves an
/// (empty) ledger behind after `flush`.
pub struct JsonLinesLedger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("failed to open ledger {}", self.path.display()))?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .context("ledger writer unavailable after open")
    }
}

impl OutcomeLedger for JsonLinesLedger {
    fn append<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(outcome).context("failed to encode outcome")?;
            line.push(b'\n');
            let path = self.path.display().to_string();
            let writer = self.writer().await?;
            writer
                .write_all(&line)
                .await
                .with_context(|| format!("failed to append to ledger {path}"))?;
            writer
                .flush()
                .await
                .with_context(|| format!("failed to flush ledger {path}"))
        })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let path = self.path.display().to_string();
            self.writer()
                .await?
                .flush()
                .await
                .with_context(|| format!("failed to flush ledger {path}"))
        })
    }
}

/// Ledger kept in memory; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<Mutex<Vec<Outcome>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Outcome> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutcomeLedger for MemoryLedger {
    fn append<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, Result<()>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
        Box::pin(async { Ok(()) })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn failure_payload(error: &anyhow::Error) -> Option<&Value> {
    error
        .downcast_ref::<RegistrationError>()
        .and_then(RegistrationError::payload)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogFailureReporter;

impl FailureReporter for LogFailureReporter {
    fn report(&self, record: &Record, attempts: usize, error: &anyhow::Error) {
        match failure_payload(error) {
            Some(payload) => tracing::error!(
                token = %record.id,
                sequence = record.sequence,
                attempts,
                error = %error,
                response = %payload,
                "registration failed"
            ),
            None => tracing::error!(
                token = %record.id,
                sequence = record.sequence,
                attempts,
                error = %error,
                "registration failed"
            ),
        }
    }
}

/// One reported failure as seen by [`MemoryFailureReporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedFailure {
    pub device_token: String,
    pub sequence: u64,
    pub attempts: usize,
    pub message: String,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFailureReporter {
    failures: Arc<Mutex<Vec<ReportedFailure>>>,
}

impl MemoryFailureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<ReportedFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FailureReporter for MemoryFailureReporter {
    fn report(&self, record: &Record, attempts: usize, error: &anyhow::Error) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReportedFailure {
                device_token: record.id.clone(),
                sequence: record.sequence,
                attempts,
                message: error.to_string(),
                payload: failure_payload(error).cloned(),
            });
    }
}
