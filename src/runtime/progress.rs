use crate::pipeline::outcome::OutcomeStatus;
use crate::source::page::Totals;
use std::fmt;

/// Read-only view of the aggregator's counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total_expected: Option<u64>,
    pub active_expected: Option<u64>,
    pub sent: u64,
    pub inactive: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn with_totals(mut self, totals: Totals) -> Self {
        self.total_expected = Some(totals.total);
        self.active_expected = Some(totals.active);
        self
    }

    pub fn count(&self, status: OutcomeStatus) -> u64 {
        match status {
            OutcomeStatus::Sent => self.sent,
            OutcomeStatus::Inactive => self.inactive,
            OutcomeStatus::Failed => self.failed,
        }
    }

    /// Outcomes received so far, whatever their status.
    pub fn processed(&self) -> u64 {
        self.sent + self.inactive + self.failed
    }

    pub fn download_percent(&self) -> f64 {
        percent(self.downloaded, self.total_expected)
    }

    pub fn upload_percent(&self) -> f64 {
        percent(self.sent, self.active_expected)
    }
}

fn percent(done: u64, expected: Option<u64>) -> f64 {
    match expected {
        Some(expected) if expected > 0 => (done as f64 / expected as f64 * 100.0).min(100.0),
        _ => 0.0,
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% imported ({} of {} total tokens) --- {:.1}% exported ({} of {} active tokens)",
            self.download_percent(),
            self.downloaded,
            self.total_expected.unwrap_or(0),
            self.upload_percent(),
            self.sent,
            self.active_expected.unwrap_or(0),
        )
    }
}
