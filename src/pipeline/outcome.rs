use crate::source::page::{Record, Totals};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Terminal classification of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Sent,
    Inactive,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Sent => "SENT",
            OutcomeStatus::Inactive => "INACTIVE",
            OutcomeStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger line: the status a record ended in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub device_token: String,
    pub sequence: u64,
}

impl Outcome {
    pub fn new(record: &Record, status: OutcomeStatus) -> Self {
        Self {
            status,
            device_token: record.id.clone(),
            sequence: record.sequence,
        }
    }
}

/// Everything the aggregator can be told. Producers never touch counters
/// directly; they describe what happened and the aggregator applies it.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEvent {
    Totals(Totals),
    Downloaded(usize),
    Outcome(Outcome),
}

pub type EventSender = mpsc::Sender<AggregatorEvent>;
pub type EventReceiver = mpsc::Receiver<AggregatorEvent>;

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
