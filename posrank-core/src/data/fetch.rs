//! Single-exchange fetcher: one data-source call normalised into an outcome.

use super::source::DataError;
use crate::domain::Exchange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// One exchange + trade date pair to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTask {
    pub exchange: Exchange,
    pub trade_date: NaiveDate,
}

impl FetchTask {
    pub fn new(exchange: Exchange, trade_date: NaiveDate) -> Self {
        Self {
            exchange,
            trade_date,
        }
    }
}

/// Why a single exchange produced no data in a fetch cycle.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum FetchFailure {
    #[error("{0}")]
    Source(String),

    #[error("empty result")]
    Empty,

    #[error("timeout: no result within {after_secs:.1}s")]
    Timeout { after_secs: f64 },
}

impl FetchFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchFailure::Timeout { .. })
    }
}

impl From<DataError> for FetchFailure {
    fn from(e: DataError) -> Self {
        FetchFailure::Source(e.to_string())
    }
}

/// Anything a fetch can return that has a row count.
pub trait Tabular {
    fn row_count(&self) -> usize;
}

impl<R> Tabular for Vec<R> {
    fn row_count(&self) -> usize {
        self.len()
    }
}

/// Result of attempting one FetchTask. Exactly one exists per task per cycle.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub task: FetchTask,
    pub result: Result<T, FetchFailure>,
    /// Wall-clock time the outcome was recorded.
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl<T> FetchOutcome<T> {
    pub fn exchange(&self) -> Exchange {
        self.task.exchange
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        self.result.as_ref().err()
    }

    /// Outcome recorded for a task that was still pending at the deadline.
    pub fn timed_out(task: FetchTask, timeout: Duration, finished_at: DateTime<Utc>) -> Self {
        Self {
            task,
            result: Err(FetchFailure::Timeout {
                after_secs: timeout.as_secs_f64(),
            }),
            finished_at,
            elapsed: timeout,
        }
    }
}

/// Run one data-source call and capture its result.
///
/// Source errors and empty tables become failure outcomes; nothing escapes
/// except a panic inside `call`, which the orchestrator treats as fatal.
pub fn fetch_one<T, F>(task: FetchTask, call: F) -> FetchOutcome<T>
where
    T: Tabular,
    F: FnOnce(Exchange, NaiveDate) -> Result<T, DataError>,
{
    let started = Instant::now();
    tracing::debug!(exchange = %task.exchange, date = %task.trade_date, "fetch start");

    let result = match call(task.exchange, task.trade_date) {
        Ok(data) if data.row_count() == 0 => Err(FetchFailure::Empty),
        Ok(data) => Ok(data),
        Err(e) => Err(FetchFailure::from(e)),
    };

    let elapsed = started.elapsed();
    match &result {
        Ok(data) => tracing::debug!(
            exchange = %task.exchange,
            rows = data.row_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "fetch done"
        ),
        Err(reason) => tracing::warn!(
            exchange = %task.exchange,
            date = %task.trade_date,
            %reason,
            "fetch failed"
        ),
    }

    FetchOutcome {
        task,
        result,
        finished_at: Utc::now(),
        elapsed,
    }
}
