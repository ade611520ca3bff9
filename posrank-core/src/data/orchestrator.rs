//! Bounded concurrent fetch orchestrator.
//!
//! Fans one fetch per exchange out to a small pool of OS threads, each running
//! a blocking data-source call to completion before taking the next task. The
//! calling thread is the single collection point: it drains the result
//! channel, reports progress, and stops waiting once the cycle deadline has
//! elapsed. Tasks still pending at the deadline are recorded as timeouts;
//! their workers are not killed, and anything they send later lands in a
//! closed channel.

use super::fetch::{fetch_one, FetchOutcome, FetchTask, Tabular};
use super::progress::{FetchProgress, ProgressEvent};
use super::source::DataError;
use crate::domain::Exchange;
use chrono::{NaiveDate, Utc};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Smallest allowed worker count.
pub const MIN_WORKERS: usize = 1;
/// Largest allowed worker count.
pub const MAX_WORKERS: usize = 5;

/// Clamp a requested worker count into `MIN_WORKERS..=MAX_WORKERS`.
pub fn clamp_workers(requested: usize) -> usize {
    requested.clamp(MIN_WORKERS, MAX_WORKERS)
}

/// Concurrency and deadline settings for one fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOptions {
    pub max_workers: usize,
    /// Bound on the whole cycle, not on individual calls.
    pub timeout: Duration,
}

impl FetchOptions {
    pub fn new(max_workers: usize, timeout: Duration) -> Self {
        Self {
            max_workers: clamp_workers(max_workers),
            timeout,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

/// Failures that abort a whole fetch cycle. No result is produced.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("no exchanges requested")]
    NoExchanges,

    #[error("fetch worker for {exchange} panicked: {message}")]
    WorkerPanicked { exchange: Exchange, message: String },

    #[error("failed to spawn fetch worker: {0}")]
    Spawn(String),

    #[error("fetch workers exited with {pending} task(s) unfinished")]
    WorkersExited { pending: usize },
}

enum WorkerMessage<T> {
    Done(FetchOutcome<T>),
    Panicked { exchange: Exchange, message: String },
}

/// Fetch every requested exchange for `trade_date` under `opts`.
///
/// Returns exactly one outcome per distinct exchange, in completion order
/// (timeouts last, in request order). Partial failure is not an error.
pub fn run<T, F>(
    exchanges: &[Exchange],
    trade_date: NaiveDate,
    opts: &FetchOptions,
    fetch: F,
    progress: &dyn FetchProgress,
) -> Result<Vec<FetchOutcome<T>>, OrchestrationError>
where
    T: Tabular + Send + 'static,
    F: Fn(Exchange, NaiveDate) -> Result<T, DataError> + Send + Sync + 'static,
{
    let tasks = plan_tasks(exchanges, trade_date);
    if tasks.is_empty() {
        return Err(OrchestrationError::NoExchanges);
    }

    let total = tasks.len();
    let workers = clamp_workers(opts.max_workers).min(total);
    // None when the timeout is past what `Instant` can represent.
    let deadline = Instant::now().checked_add(opts.timeout);
    tracing::info!(
        date = %trade_date,
        tasks = total,
        workers,
        timeout_secs = opts.timeout.as_secs_f64(),
        "fetch cycle start"
    );

    let queue = Arc::new(Mutex::new(tasks.iter().copied().collect::<VecDeque<_>>()));
    let cancel = Arc::new(AtomicBool::new(false));
    let fetch = Arc::new(fetch);
    let (tx, rx) = mpsc::channel();

    for i in 0..workers {
        let queue = Arc::clone(&queue);
        let cancel_flag = Arc::clone(&cancel);
        let fetch = Arc::clone(&fetch);
        let tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("posrank-fetch-{i}"))
            .spawn(move || worker_loop(&queue, &cancel_flag, fetch.as_ref(), &tx));
        if let Err(e) = spawned {
            cancel.store(true, Ordering::Relaxed);
            return Err(OrchestrationError::Spawn(e.to_string()));
        }
    }
    // Only workers hold senders from here on.
    drop(tx);

    let mut pending: Vec<Exchange> = tasks.iter().map(|t| t.exchange).collect();
    let mut outcomes: Vec<FetchOutcome<T>> = Vec::with_capacity(total);
    let mut succeeded = 0usize;

    while !pending.is_empty() {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => opts.timeout,
        };
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(WorkerMessage::Done(outcome)) => {
                pending.retain(|ex| *ex != outcome.exchange());
                if outcome.is_success() {
                    succeeded += 1;
                }
                progress.on_outcome(&ProgressEvent::from_outcome(
                    outcomes.len() + 1,
                    total,
                    &outcome,
                ));
                outcomes.push(outcome);
            }
            Ok(WorkerMessage::Panicked { exchange, message }) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::error!(%exchange, %message, "fetch worker panicked");
                return Err(OrchestrationError::WorkerPanicked { exchange, message });
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                cancel.store(true, Ordering::Relaxed);
                return Err(OrchestrationError::WorkersExited {
                    pending: pending.len(),
                });
            }
        }
    }

    // Queued tasks that never started are not worth starting any more.
    cancel.store(true, Ordering::Relaxed);

    if !pending.is_empty() {
        tracing::warn!(
            pending = pending.len(),
            timeout_secs = opts.timeout.as_secs_f64(),
            "fetch cycle deadline elapsed"
        );
        let now = Utc::now();
        for exchange in pending {
            let outcome =
                FetchOutcome::timed_out(FetchTask::new(exchange, trade_date), opts.timeout, now);
            progress.on_outcome(&ProgressEvent::from_outcome(
                outcomes.len() + 1,
                total,
                &outcome,
            ));
            outcomes.push(outcome);
        }
    }

    let failed = total - succeeded;
    tracing::info!(date = %trade_date, succeeded, failed, total, "fetch cycle done");
    progress.on_cycle_complete(succeeded, failed, total);

    Ok(outcomes)
}

/// One task per distinct exchange, first occurrence wins.
fn plan_tasks(exchanges: &[Exchange], trade_date: NaiveDate) -> Vec<FetchTask> {
    let mut tasks: Vec<FetchTask> = Vec::with_capacity(exchanges.len());
    for &exchange in exchanges {
        if !tasks.iter().any(|t| t.exchange == exchange) {
            tasks.push(FetchTask::new(exchange, trade_date));
        }
    }
    tasks
}

fn worker_loop<T, F>(
    queue: &Mutex<VecDeque<FetchTask>>,
    cancel: &AtomicBool,
    fetch: &F,
    tx: &Sender<WorkerMessage<T>>,
) where
    T: Tabular,
    F: Fn(Exchange, NaiveDate) -> Result<T, DataError>,
{
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let next = match queue.lock() {
            Ok(mut q) => q.pop_front(),
            Err(_) => break,
        };
        let Some(task) = next else {
            break;
        };

        let message = match panic::catch_unwind(AssertUnwindSafe(|| fetch_one(task, fetch))) {
            Ok(outcome) => WorkerMessage::Done(outcome),
            Err(payload) => WorkerMessage::Panicked {
                exchange: task.exchange,
                message: panic_message(payload.as_ref()),
            },
        };

        // A closed channel means the collector has moved on.
        if tx.send(message).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
