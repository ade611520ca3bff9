//! Property tests for fetch-cycle invariants.
//!
//! Uses proptest to verify:
//! 1. Completeness: one outcome per distinct requested exchange, and the
//!    aggregated success and failure sets partition the request
//! 2. Idempotence: aggregating the same outcome list twice gives the same result

use chrono::{NaiveDate, TimeZone, Utc};
use posrank_core::data::orchestrator::{self, FetchOptions};
use posrank_core::data::{
    aggregate, sample_seat_rows, ExchangeDataSource, FetchFailure, FetchOutcome, FetchTask,
    MemorySource, NoProgress,
};
use posrank_core::domain::{Exchange, PositionRow};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_exchange() -> impl Strategy<Value = Exchange> {
    prop::sample::select(Exchange::POSITION_RANK.to_vec())
}

/// What a scripted exchange does: Some(rows) succeeds (0 rows = empty), None errors.
fn arb_script() -> impl Strategy<Value = Option<usize>> {
    prop::option::of(0usize..6)
}

fn arb_failure() -> impl Strategy<Value = FetchFailure> {
    prop_oneof![
        "[a-z ]{1,12}".prop_map(FetchFailure::Source),
        Just(FetchFailure::Empty),
        (1u32..120).prop_map(|s| FetchFailure::Timeout {
            after_secs: f64::from(s)
        }),
    ]
}

fn arb_outcome() -> impl Strategy<Value = FetchOutcome<Vec<PositionRow>>> {
    (
        arb_exchange(),
        prop_oneof![
            (1usize..4).prop_map(Ok::<usize, FetchFailure>),
            arb_failure().prop_map(Err::<usize, FetchFailure>),
        ],
        0u32..60,
    )
        .prop_map(|(exchange, result, sec)| FetchOutcome {
            task: FetchTask::new(exchange, date()),
            result: result.map(|n| sample_seat_rows(exchange, "m2409", n)),
            finished_at: Utc.with_ymd_and_hms(2024, 7, 19, 15, 30, sec).unwrap(),
            elapsed: Duration::from_millis(u64::from(sec) * 10),
        })
}

// ── 1. Completeness ──────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every distinct requested exchange yields exactly one outcome.
    #[test]
    fn one_outcome_per_requested_exchange(
        request in prop::collection::vec(arb_exchange(), 1..8),
        scripts in prop::collection::vec(arb_script(), 5),
        workers in 0usize..9,
    ) {
        let mut source = MemorySource::new();
        for (exchange, script) in Exchange::POSITION_RANK.iter().zip(&scripts) {
            source = match script {
                Some(n) => source.with_positions(*exchange, sample_seat_rows(*exchange, "c2409", *n)),
                None => source.with_error(*exchange, "scripted failure"),
            };
        }
        let source = Arc::new(source);
        let fetch = {
            let source = Arc::clone(&source);
            move |ex, d| source.position_ranks(ex, d)
        };

        let outcomes = orchestrator::run(
            &request,
            date(),
            &FetchOptions::new(workers, Duration::from_secs(10)),
            fetch,
            &NoProgress,
        ).unwrap();

        let requested: BTreeSet<Exchange> = request.iter().copied().collect();
        prop_assert_eq!(outcomes.len(), requested.len());
        let seen: BTreeSet<Exchange> = outcomes.iter().map(|o| o.exchange()).collect();
        prop_assert_eq!(&seen, &requested);

        let agg = aggregate(date(), &outcomes);
        let failed = agg.failed_exchanges();
        prop_assert!(agg.succeeded.is_disjoint(&failed));
        let union: BTreeSet<Exchange> = agg.succeeded.union(&failed).copied().collect();
        prop_assert_eq!(&union, &requested);
        prop_assert_eq!(agg.requested(), requested.len());

        // Successful exchanges contribute all their rows; failed ones none.
        for exchange in &requested {
            let contributed = agg.rows_for(*exchange).count();
            if agg.succeeded.contains(exchange) {
                prop_assert!(contributed > 0);
            } else {
                prop_assert_eq!(contributed, 0);
            }
        }
        prop_assert_eq!(source.total_calls(), requested.len());
    }
}

// ── 2. Idempotence ───────────────────────────────────────────────────

proptest! {
    /// Aggregation is a pure function of its outcome list.
    #[test]
    fn aggregate_is_idempotent(outcomes in prop::collection::vec(arb_outcome(), 0..8)) {
        let first = aggregate(date(), &outcomes);
        let second = aggregate(date(), &outcomes);
        prop_assert_eq!(&first, &second);

        let expected_rows: usize = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(Vec::len)
            .sum();
        prop_assert_eq!(first.row_count(), expected_rows);

        if let Some(latest) = outcomes.iter().map(|o| o.finished_at).max() {
            prop_assert_eq!(first.completed_at, latest);
        }
    }
}
