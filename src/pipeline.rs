//! The concurrent migration pipeline.
//!
//! - `record_queue`: bounded MPMC queue between the token source and workers
//! - `outcome`: outcome types and the aggregator's event channel
//! - `completion`: one-shot completion signal and the run coordinator
//! - `backoff`: retry policy and the retry loop used by workers
//! - `worker` / `worker_pool`: registration workers and their supervision
//! - `aggregator`: single owner of progress counters and the ledger
//! - `migrator`: wires one run together

pub mod aggregator;
pub mod backoff;
pub mod completion;
pub mod migrator;
pub mod outcome;
pub mod record_queue;
pub mod worker;
pub mod worker_pool;

pub use aggregator::{AggregatorHandle, AggregatorParams, OutcomeAggregator};
pub use backoff::{BackoffStrategy, RetryPolicy};
pub use completion::{CompletionCoordinator, CompletionSignal, MigrationReport};
pub use migrator::{MigrationSinks, Migrator};
pub use outcome::{
    event_channel, AggregatorEvent, EventReceiver, EventSender, Outcome, OutcomeStatus,
};
pub use record_queue::RecordQueue;
pub use worker::{MalformedRecord, Worker, WorkerShared};
pub use worker_pool::{WorkerExit, WorkerReport};
