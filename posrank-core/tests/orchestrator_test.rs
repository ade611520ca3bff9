//! Integration tests for the fetch orchestrator and aggregator.
//!
//! Every test drives the orchestrator with a scripted MemorySource, so
//! latency, failures and panics are deterministic per exchange.

use chrono::NaiveDate;
use posrank_core::data::orchestrator::{self, FetchOptions};
use posrank_core::data::{
    aggregate, sample_seat_rows, CycleStatus, DataError, ExchangeDataSource, FetchFailure,
    FetchProgress, MemorySource, OutcomeStatus, ProgressEvent,
};
use posrank_core::domain::{Exchange, PositionRow};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const A: Exchange = Exchange::Dce;
const B: Exchange = Exchange::Cffex;
const C: Exchange = Exchange::Czce;
const D: Exchange = Exchange::Shfe;
const E: Exchange = Exchange::Gfex;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
}

fn rows(exchange: Exchange, n: usize) -> Vec<PositionRow> {
    sample_seat_rows(exchange, "x2409", n)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ProgressEvent>>,
    summary: Mutex<Option<(usize, usize, usize)>>,
}

impl FetchProgress for Recorder {
    fn on_outcome(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_cycle_complete(&self, succeeded: usize, failed: usize, total: usize) {
        let mut summary = self.summary.lock().unwrap();
        assert!(summary.is_none(), "cycle completion reported twice");
        *summary = Some((succeeded, failed, total));
    }
}

fn fetch_positions(
    source: Arc<MemorySource>,
) -> impl Fn(Exchange, NaiveDate) -> Result<Vec<PositionRow>, DataError> + Send + Sync + 'static {
    move |exchange, trade_date| source.position_ranks(exchange, trade_date)
}

// ── Partial failure ──────────────────────────────────────────────────

#[test]
fn five_exchanges_two_failures() {
    let source = Arc::new(
        MemorySource::new()
            .with_positions(A, rows(A, 10))
            .with_error(B, "gateway 502")
            .with_positions(C, rows(C, 20))
            .with_error(D, "connection reset")
            .with_positions(E, rows(E, 5)),
    );
    let recorder = Recorder::default();

    let outcomes = orchestrator::run(
        &[A, B, C, D, E],
        date(),
        &FetchOptions::new(3, Duration::from_secs(10)),
        fetch_positions(source),
        &recorder,
    )
    .unwrap();
    assert_eq!(outcomes.len(), 5);

    let agg = aggregate(date(), &outcomes);
    assert_eq!(agg.row_count(), 35);
    assert_eq!(agg.succeeded, BTreeSet::from([A, C, E]));
    assert_eq!(agg.failed_exchanges(), BTreeSet::from([B, D]));
    assert_eq!(
        agg.status(),
        CycleStatus::Partial {
            succeeded: 3,
            requested: 5
        }
    );
    assert!(agg.rows.iter().all(|r| r.exchange != B && r.exchange != D));
    assert_eq!(
        agg.failure_reason(B).map(ToString::to_string).as_deref(),
        Some("data error: gateway 502")
    );
    assert_eq!(*recorder.summary.lock().unwrap(), Some((3, 2, 5)));
}

#[test]
fn empty_table_counts_as_failure() {
    let source = Arc::new(
        MemorySource::new()
            .with_positions(A, rows(A, 4))
            .with_positions(B, Vec::new()),
    );
    let outcomes = orchestrator::run(
        &[A, B],
        date(),
        &FetchOptions::default(),
        fetch_positions(source),
        &Recorder::default(),
    )
    .unwrap();
    let agg = aggregate(date(), &outcomes);
    assert_eq!(agg.failure_reason(B), Some(&FetchFailure::Empty));
    assert_eq!(agg.row_count(), 4);
}

#[test]
fn every_exchange_failing_is_not_an_orchestration_error() {
    let source = Arc::new(MemorySource::new());
    let outcomes = orchestrator::run(
        &[A, C],
        date(),
        &FetchOptions::default(),
        fetch_positions(source),
        &Recorder::default(),
    )
    .unwrap();
    let agg = aggregate(date(), &outcomes);
    assert_eq!(agg.status(), CycleStatus::Failed);
    assert!(agg.rows.is_empty());
}

// ── Deadline ─────────────────────────────────────────────────────────

#[test]
fn late_success_is_recorded_as_timeout() {
    let source = Arc::new(
        MemorySource::new()
            .with_positions(A, rows(A, 3))
            .with_positions(D, rows(D, 3))
            .with_delay(D, Duration::from_secs(3)),
    );
    let recorder = Recorder::default();

    let outcomes = orchestrator::run(
        &[A, D],
        date(),
        &FetchOptions::new(2, Duration::from_millis(500)),
        fetch_positions(source),
        &recorder,
    )
    .unwrap();

    let by_exchange = |ex: Exchange| outcomes.iter().find(|o| o.exchange() == ex).unwrap();
    assert!(by_exchange(A).is_success());
    assert!(by_exchange(D).failure().unwrap().is_timeout());

    // Outcomes after the deadline are discarded, never swapped in.
    std::thread::sleep(Duration::from_millis(100));
    let agg = aggregate(date(), &outcomes);
    assert_eq!(agg.succeeded, BTreeSet::from([A]));
    assert_eq!(agg.row_count(), 3);
}

#[test]
fn slow_source_times_out_every_task_on_schedule() {
    // Data would be there, if only it arrived in time.
    let source = Arc::new(
        [A, B, C, D, E]
            .into_iter()
            .fold(MemorySource::new(), |s, ex| s.with_positions(ex, rows(ex, 2)))
            .with_default_delay(Duration::from_secs(5)),
    );
    let recorder = Recorder::default();

    let started = Instant::now();
    let outcomes = orchestrator::run(
        &[A, B, C, D, E],
        date(),
        &FetchOptions::new(3, Duration::from_secs(1)),
        fetch_positions(Arc::clone(&source)),
        &recorder,
    )
    .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "deadline overrun: {elapsed:?}");
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.failure().is_some_and(FetchFailure::is_timeout)));

    // Timeouts are reported in request order.
    let order: Vec<_> = outcomes.iter().map(|o| o.exchange()).collect();
    assert_eq!(order, vec![A, B, C, D, E]);

    // Only the first wave of workers ever started; queued tasks were cancelled.
    assert_eq!(source.total_calls(), 3);
    assert_eq!(*recorder.summary.lock().unwrap(), Some((0, 5, 5)));

    // One progress tick per timed-out task, counted up in request order.
    let events = recorder.events.lock().unwrap();
    let ticks: Vec<_> = events.iter().map(|e| (e.completed, e.total, e.exchange)).collect();
    assert_eq!(ticks, vec![(1, 5, A), (2, 5, B), (3, 5, C), (4, 5, D), (5, 5, E)]);
    for event in events.iter() {
        match &event.status {
            OutcomeStatus::Failed { reason } => assert!(reason.contains("timeout"), "{reason}"),
            other => panic!("expected a timeout for {}, got {other:?}", event.exchange),
        }
    }
}

// ── Progress ─────────────────────────────────────────────────────────

#[test]
fn progress_is_reported_once_per_task_in_completion_order() {
    let source = Arc::new(
        MemorySource::new()
            .with_positions(A, rows(A, 1))
            .with_delay(A, Duration::from_millis(300))
            .with_positions(B, rows(B, 2))
            .with_error(C, "boom"),
    );
    let recorder = Recorder::default();

    let outcomes = orchestrator::run(
        &[A, B, C],
        date(),
        &FetchOptions::new(5, Duration::from_secs(10)),
        fetch_positions(source),
        &recorder,
    )
    .unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 3);
    let counters: Vec<_> = events.iter().map(|e| (e.completed, e.total)).collect();
    assert_eq!(counters, vec![(1, 3), (2, 3), (3, 3)]);

    let event_order: Vec<_> = events.iter().map(|e| e.exchange).collect();
    let outcome_order: Vec<_> = outcomes.iter().map(|o| o.exchange()).collect();
    assert_eq!(event_order, outcome_order);
    assert_eq!(events.last().unwrap().exchange, A, "slowest exchange finishes last");
    assert_eq!(events.last().unwrap().status, OutcomeStatus::Succeeded { rows: 1 });
}

#[test]
fn single_worker_runs_tasks_sequentially() {
    let source = Arc::new(
        [A, B, C]
            .into_iter()
            .fold(MemorySource::new(), |s, ex| s.with_positions(ex, rows(ex, 1)))
            .with_default_delay(Duration::from_millis(100)),
    );
    let started = Instant::now();
    let outcomes = orchestrator::run(
        &[A, B, C],
        date(),
        &FetchOptions::new(0, Duration::from_secs(10)),
        fetch_positions(source),
        &Recorder::default(),
    )
    .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    let order: Vec<_> = outcomes.iter().map(|o| o.exchange()).collect();
    assert_eq!(order, vec![A, B, C], "one worker drains the queue in request order");
}
