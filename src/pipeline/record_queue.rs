use crate::source::page::Record;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// Bounded FIFO shared by the token source and every worker.
///
/// `push` waits while the queue is full and `pop` waits while it is empty.
/// Removal happens under the lock with no suspension point before returning,
/// so a `pop` raced inside `select!` never loses a record.
pub struct RecordQueue {
    records: Mutex<VecDeque<Record>>,
    notify: Notify,
    capacity: usize,
}

impl RecordQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            notify: Notify::new(),
            capacity,
        }
    }

    pub async fn push(&self, record: Record) {
        let mut pending = Some(record);
        loop {
            let notified = self.notify.notified();
            let mut records = self.records.lock().await;
            if records.len() < self.capacity {
                if let Some(record) = pending.take() {
                    records.push_back(record);
                }
                drop(records);
                self.notify.notify_waiters();
                return;
            }
            drop(records);
            notified.await;
        }
    }

    pub async fn pop(&self) -> Record {
        loop {
            if let Some(record) = self.try_pop().await {
                return record;
            }
            let notified = self.notify.notified();
            if let Some(record) = self.try_pop().await {
                return record;
            }
            notified.await;
        }
    }

    pub async fn try_pop(&self) -> Option<Record> {
        let mut records = self.records.lock().await;
        let record = records.pop_front();
        drop(records);
        if record.is_some() {
            self.notify.notify_waiters();
        }
        record
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
