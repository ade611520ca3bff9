//! Merge per-exchange fetch outcomes into one dataset.

use super::fetch::{FetchFailure, FetchOutcome};
use crate::domain::Exchange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Overall result of a fetch cycle as the user sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    /// Every requested exchange delivered data.
    Complete,
    /// Some exchanges delivered data.
    Partial { succeeded: usize, requested: usize },
    /// No exchange delivered data.
    Failed,
}

/// Union of all successful outcomes' rows plus the exchanges that failed.
///
/// `succeeded` and the keys of `failed` are disjoint and together equal the
/// requested exchange set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult<R> {
    pub trade_date: NaiveDate,
    /// Success rows, concatenated in outcome order.
    pub rows: Vec<R>,
    pub succeeded: BTreeSet<Exchange>,
    pub failed: BTreeMap<Exchange, FetchFailure>,
    /// Latest `finished_at` among the outcomes.
    pub completed_at: DateTime<Utc>,
}

impl<R> AggregatedResult<R> {
    pub fn requested(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn status(&self) -> CycleStatus {
        let requested = self.requested();
        if self.succeeded.is_empty() {
            CycleStatus::Failed
        } else if self.failed.is_empty() {
            CycleStatus::Complete
        } else {
            CycleStatus::Partial {
                succeeded: self.succeeded.len(),
                requested,
            }
        }
    }

    pub fn failure_reason(&self, exchange: Exchange) -> Option<&FetchFailure> {
        self.failed.get(&exchange)
    }

    /// Exchange identifiers that failed, for display.
    pub fn failed_exchanges(&self) -> BTreeSet<Exchange> {
        self.failed.keys().copied().collect()
    }
}

/// Rows that know which exchange they came from.
pub trait ExchangeRow {
    fn exchange(&self) -> Exchange;
}

impl ExchangeRow for crate::domain::PositionRow {
    fn exchange(&self) -> Exchange {
        self.exchange
    }
}

impl ExchangeRow for crate::domain::DailyPrice {
    fn exchange(&self) -> Exchange {
        self.exchange
    }
}

impl<R: ExchangeRow> AggregatedResult<R> {
    pub fn rows_for(&self, exchange: Exchange) -> impl Iterator<Item = &R> + '_ {
        self.rows.iter().filter(move |r| r.exchange() == exchange)
    }
}

/// Merge outcomes into an AggregatedResult.
///
/// Pass-through: rows are concatenated unchanged, no column reconciliation.
/// Deterministic for a given outcome list, including the timestamp.
pub fn aggregate<R: Clone>(
    trade_date: NaiveDate,
    outcomes: &[FetchOutcome<Vec<R>>],
) -> AggregatedResult<R> {
    let mut rows = Vec::with_capacity(outcomes.iter().map(row_hint).sum());
    let mut succeeded = BTreeSet::new();
    let mut failed = BTreeMap::new();
    let mut completed_at: Option<DateTime<Utc>> = None;

    for outcome in outcomes {
        match &outcome.result {
            Ok(data) => {
                rows.extend(data.iter().cloned());
                succeeded.insert(outcome.exchange());
            }
            Err(reason) => {
                failed.insert(outcome.exchange(), reason.clone());
            }
        }
        completed_at = Some(match completed_at {
            Some(t) if t >= outcome.finished_at => t,
            _ => outcome.finished_at,
        });
    }

    AggregatedResult {
        trade_date,
        rows,
        succeeded,
        failed,
        completed_at: completed_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn row_hint<R>(outcome: &FetchOutcome<Vec<R>>) -> usize {
    outcome.result.as_ref().map(Vec::len).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fetch::FetchTask;
    use chrono::TimeZone;
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
    }

    fn outcome(ex: Exchange, result: Result<Vec<u32>, FetchFailure>, sec: u32) -> FetchOutcome<Vec<u32>> {
        FetchOutcome {
            task: FetchTask::new(ex, date()),
            result,
            finished_at: Utc.with_ymd_and_hms(2024, 7, 19, 16, 0, sec).unwrap(),
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn rows_follow_outcome_order() {
        let outcomes = vec![
            outcome(Exchange::Shfe, Ok(vec![3, 4]), 2),
            outcome(Exchange::Dce, Ok(vec![1]), 1),
        ];
        let agg = aggregate(date(), &outcomes);
        assert_eq!(agg.rows, vec![3, 4, 1]);
        assert_eq!(agg.status(), CycleStatus::Complete);
        assert_eq!(agg.completed_at.timestamp(), outcomes[0].finished_at.timestamp());
    }

    #[test]
    fn partial_and_failed_status() {
        let partial = aggregate(
            date(),
            &[
                outcome(Exchange::Dce, Ok(vec![1]), 1),
                outcome(Exchange::Czce, Err(FetchFailure::Empty), 2),
            ],
        );
        assert_eq!(
            partial.status(),
            CycleStatus::Partial {
                succeeded: 1,
                requested: 2
            }
        );
        assert_eq!(partial.failure_reason(Exchange::Czce), Some(&FetchFailure::Empty));

        let failed = aggregate(
            date(),
            &[outcome(Exchange::Gfex, Err(FetchFailure::Source("boom".into())), 1)],
        );
        assert_eq!(failed.status(), CycleStatus::Failed);
        assert!(failed.rows.is_empty());
    }

    #[test]
    fn empty_outcome_list_has_epoch_timestamp() {
        let agg: AggregatedResult<u32> = aggregate(date(), &[]);
        assert_eq!(agg.requested(), 0);
        assert_eq!(agg.completed_at, DateTime::<Utc>::UNIX_EPOCH);
    }
}
