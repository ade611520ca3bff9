//! Background worker thread: fetch cycles and analysis run here.
//!
//! Communication with the presentation thread is via `mpsc` channels.
//! Progress events are forwarded as they arrive so the caller can redraw
//! between them. Contract analysis runs on a private rayon::ThreadPool
//! (not the global pool).

use std::io;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::NaiveDate;
use rayon::ThreadPool;

use posrank_core::config::DashboardConfig;
use posrank_core::data::{FetchProgress, ProgressEvent};
use posrank_core::domain::Exchange;

use crate::pipeline::{AnalysisService, DashboardReport};

/// Commands sent from the presentation thread to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Analyze {
        trade_date: NaiveDate,
        config: Box<DashboardConfig>,
    },
    ClearCache,
    Shutdown,
}

/// Responses sent from the worker back to the presentation thread.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    // Fetch cycle
    Progress(ProgressEvent),
    CycleDone {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // Analysis
    AnalysisComplete(Box<DashboardReport>),
    AnalysisFailed {
        error: String,
        /// Per-exchange reasons when the cycle completed with no data.
        failures: Vec<(Exchange, String)>,
    },

    CacheCleared,
}

/// Spawn the background worker thread.
pub fn spawn_worker(
    service: Arc<AnalysisService>,
    rx: Receiver<WorkerCommand>,
    tx: Sender<WorkerResponse>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("posrank-worker".into())
        .spawn(move || {
            worker_loop(&service, rx, tx);
        })
}

fn worker_loop(service: &AnalysisService, rx: Receiver<WorkerCommand>, tx: Sender<WorkerResponse>) {
    // Private rayon pool; analysis falls back to the global one if it cannot be built.
    let pool = match rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("posrank-pool-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(error = %e, "worker pool unavailable, using global rayon pool");
            None
        }
    };

    loop {
        match rx.recv() {
            Ok(WorkerCommand::Shutdown) | Err(_) => break,
            Ok(cmd) => handle_command(service, pool.as_ref(), cmd, &tx),
        }
    }
    tracing::debug!("worker stopped");
}

fn handle_command(
    service: &AnalysisService,
    pool: Option<&ThreadPool>,
    cmd: WorkerCommand,
    tx: &Sender<WorkerResponse>,
) {
    match cmd {
        WorkerCommand::Analyze { trade_date, config } => {
            handle_analyze(service, pool, trade_date, &config, tx);
        }
        WorkerCommand::ClearCache => {
            service.clear_cache();
            let _ = tx.send(WorkerResponse::CacheCleared);
        }
        WorkerCommand::Shutdown => {} // handled in loop
    }
}

fn handle_analyze(
    service: &AnalysisService,
    pool: Option<&ThreadPool>,
    trade_date: NaiveDate,
    config: &DashboardConfig,
    tx: &Sender<WorkerResponse>,
) {
    let progress = ChannelProgress { tx: tx.clone() };
    let result = match pool {
        Some(pool) => pool.install(|| service.run(trade_date, config, &progress)),
        None => service.run(trade_date, config, &progress),
    };

    match result {
        Ok(report) => {
            let _ = tx.send(WorkerResponse::AnalysisComplete(Box::new(report)));
        }
        Err(e) => {
            tracing::warn!(date = %trade_date, error = %e, "analysis failed");
            let failures = e
                .failures()
                .map(|f| f.iter().map(|(ex, reason)| (*ex, reason.to_string())).collect())
                .unwrap_or_default();
            let _ = tx.send(WorkerResponse::AnalysisFailed {
                error: e.to_string(),
                failures,
            });
        }
    }
}

/// FetchProgress implementation that sends messages through a channel.
struct ChannelProgress {
    tx: Sender<WorkerResponse>,
}

impl FetchProgress for ChannelProgress {
    fn on_outcome(&self, event: &ProgressEvent) {
        let _ = self.tx.send(WorkerResponse::Progress(event.clone()));
    }

    fn on_cycle_complete(&self, succeeded: usize, failed: usize, total: usize) {
        let _ = self.tx.send(WorkerResponse::CycleDone {
            succeeded,
            failed,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posrank_core::data::{sample_seat_rows, ManualClock, MemorySource};
    use std::sync::mpsc;
    use std::time::Duration;

    fn service() -> Arc<AnalysisService> {
        let source = MemorySource::new()
            .with_positions(Exchange::Dce, sample_seat_rows(Exchange::Dce, "m2409", 10))
            .with_error(Exchange::Czce, "maintenance");
        Arc::new(AnalysisService::new(Arc::new(source), Arc::new(ManualClock::new())))
    }

    fn config() -> Box<DashboardConfig> {
        let mut config = DashboardConfig::default();
        config.fetch.exchanges = vec![Exchange::Dce, Exchange::Czce];
        config.analysis.include_term_structure = false;
        Box::new(config)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 19).unwrap()
    }

    fn next(rx: &Receiver<WorkerResponse>) -> WorkerResponse {
        rx.recv_timeout(Duration::from_secs(10)).expect("worker response")
    }

    #[test]
    fn worker_shutdown() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, _resp_rx) = mpsc::channel();

        let handle = spawn_worker(service(), cmd_rx, resp_tx).unwrap();
        cmd_tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().expect("worker should join cleanly");
    }

    #[test]
    fn worker_stops_when_commands_hang_up() {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WorkerCommand>();
        let (resp_tx, _resp_rx) = mpsc::channel();

        let handle = spawn_worker(service(), cmd_rx, resp_tx).unwrap();
        drop(cmd_tx);
        handle.join().expect("worker should join cleanly");
    }

    #[test]
    fn worker_uses_private_pool() {
        // The global rayon pool thread count should not change after spawning our worker
        let global_threads = rayon::current_num_threads();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, _resp_rx) = mpsc::channel();

        let handle = spawn_worker(service(), cmd_rx, resp_tx).unwrap();
        assert_eq!(rayon::current_num_threads(), global_threads);

        cmd_tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn analyze_streams_progress_then_report() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let handle = spawn_worker(service(), cmd_rx, resp_tx).unwrap();

        cmd_tx
            .send(WorkerCommand::Analyze {
                trade_date: date(),
                config: config(),
            })
            .unwrap();

        let mut progress = Vec::new();
        let report = loop {
            match next(&resp_rx) {
                WorkerResponse::Progress(event) => progress.push(event),
                WorkerResponse::CycleDone {
                    succeeded,
                    failed,
                    total,
                } => assert_eq!((succeeded, failed, total), (1, 1, 2)),
                WorkerResponse::AnalysisComplete(report) => break report,
                other => panic!("unexpected response {other:?}"),
            }
        };

        assert_eq!(progress.len(), 2);
        assert_eq!(progress.last().unwrap().completed, 2);
        assert_eq!(report.contracts.len(), 1);
        assert_eq!(report.contracts[0].key, "大商所_m2409");
        assert!(report.positions.failed.contains_key(&Exchange::Czce));

        cmd_tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn failed_cycle_reports_each_exchange() {
        let source = MemorySource::new().with_error(Exchange::Shfe, "gateway down");
        let service = Arc::new(AnalysisService::new(
            Arc::new(source),
            Arc::new(ManualClock::new()),
        ));
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let handle = spawn_worker(service, cmd_rx, resp_tx).unwrap();

        let mut config = config();
        config.fetch.exchanges = vec![Exchange::Shfe];
        cmd_tx
            .send(WorkerCommand::Analyze {
                trade_date: date(),
                config,
            })
            .unwrap();

        let failures = loop {
            match next(&resp_rx) {
                WorkerResponse::AnalysisFailed { failures, .. } => break failures,
                WorkerResponse::AnalysisComplete(_) => panic!("cycle should fail"),
                _ => {}
            }
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Exchange::Shfe);
        assert!(failures[0].1.contains("gateway down"));

        cmd_tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn clear_cache_is_acknowledged() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let handle = spawn_worker(service(), cmd_rx, resp_tx).unwrap();

        cmd_tx.send(WorkerCommand::ClearCache).unwrap();
        assert!(matches!(next(&resp_rx), WorkerResponse::CacheCleared));

        cmd_tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
