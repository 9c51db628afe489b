//! Per-pass sync accounting

use serde::{Deserialize, Serialize};

use super::pokemon::ReconciliationOutcome;

/// Counts accumulated over one orchestrator pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunResult {
    /// Identifiers fetched and reconciled
    pub success_count: u32,
    /// Identifiers whose fetch or save failed
    pub error_count: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
}

impl SyncRunResult {
    /// Count one reconciled identifier
    pub fn record_success(&mut self, outcome: ReconciliationOutcome) {
        self.success_count += 1;
        match outcome {
            ReconciliationOutcome::Created => self.created += 1,
            ReconciliationOutcome::Updated => self.updated += 1,
            ReconciliationOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Count one failed identifier
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Nothing succeeded
    pub fn is_total_failure(&self) -> bool {
        self.success_count == 0
    }

    /// Some succeeded, some failed
    pub fn is_partial(&self) -> bool {
        self.success_count > 0 && self.error_count > 0
    }
}
