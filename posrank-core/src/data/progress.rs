//! Progress reporting for fetch cycles.

use super::fetch::{FetchOutcome, Tabular};
use crate::domain::Exchange;
use serde::{Deserialize, Serialize};

/// Status of one completed task, without its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Succeeded { rows: usize },
    Failed { reason: String },
}

/// One progress tick: `completed` of `total` tasks are done, the latest being `exchange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub exchange: Exchange,
    pub status: OutcomeStatus,
}

impl ProgressEvent {
    pub fn from_outcome<T: Tabular>(completed: usize, total: usize, outcome: &FetchOutcome<T>) -> Self {
        let status = match &outcome.result {
            Ok(data) => OutcomeStatus::Succeeded {
                rows: data.row_count(),
            },
            Err(reason) => OutcomeStatus::Failed {
                reason: reason.to_string(),
            },
        };
        Self {
            completed,
            total,
            exchange: outcome.exchange(),
            status,
        }
    }

    /// Completion as a percentage in 0..=100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

/// Progress callback for fetch cycles.
///
/// Called from the orchestrator's collection point, one event per completed
/// task in completion order. Implementations that feed a UI thread should
/// forward through a channel rather than touch UI state directly.
pub trait FetchProgress {
    /// Called when a task completes (success, failure or timeout).
    fn on_outcome(&self, event: &ProgressEvent);

    /// Called once when the whole cycle is done.
    fn on_cycle_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that discards all events.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_outcome(&self, _event: &ProgressEvent) {}

    fn on_cycle_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_outcome(&self, event: &ProgressEvent) {
        let ex = event.exchange;
        match &event.status {
            OutcomeStatus::Succeeded { rows } => println!(
                "[{}/{}] OK   {} ({}): {rows} rows",
                event.completed,
                event.total,
                ex.code(),
                ex.display_name()
            ),
            OutcomeStatus::Failed { reason } => println!(
                "[{}/{}] FAIL {} ({}): {reason}",
                event.completed,
                event.total,
                ex.code(),
                ex.display_name()
            ),
        }
    }

    fn on_cycle_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}
