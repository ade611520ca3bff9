//! Posrank CLI — futures member position-rank analysis from the terminal.
//!
//! Commands:
//! - `analyze` — fetch the day's rank tables, run the seat strategies, print the dashboard
//! - `fetch` — run one fetch cycle, print per-exchange outcomes, optionally save CSV snapshots
//! - `config` — print the effective configuration as TOML

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use posrank_core::config::{DashboardConfig, SourceKind};
use posrank_core::data::orchestrator;
use posrank_core::data::{
    aggregate, CycleStatus, ExchangeDataSource, FetchOutcome, OutcomeStatus, SnapshotWriter,
    StdoutProgress, Tabular,
};
use posrank_core::domain::{parse_trade_date, Exchange};
use posrank_runner::{
    spawn_worker, AnalysisService, DashboardReport, RankedSignal, StrategyId, TermStructure,
    WorkerCommand, WorkerResponse,
};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "posrank",
    about = "Posrank CLI — futures member position-rank dashboard"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that talks to a data source.
#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Path to a TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data source: aktools or snapshot.
    #[arg(long)]
    source: Option<SourceKind>,

    /// AKTools gateway URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Snapshot root directory (with --source snapshot).
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Exchanges to fetch, comma separated (e.g. DCE,SHFE).
    #[arg(long, value_delimiter = ',')]
    exchanges: Vec<Exchange>,

    /// Concurrent fetch workers (clamped to 1..=5).
    #[arg(long)]
    workers: Option<usize>,

    /// Overall fetch timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch position ranks, run every strategy, and print the dashboard.
    Analyze {
        #[command(flatten)]
        source: SourceArgs,

        /// Trade date (YYYYMMDD or YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        date: Option<String>,

        /// Ignore cached data and fetch again.
        #[arg(long, default_value_t = false)]
        bypass_cache: bool,

        /// Skip the daily-price fetch and term-structure analysis.
        #[arg(long, default_value_t = false)]
        no_term_structure: bool,

        /// Rows shown per ranking table.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Run one fetch cycle and print the per-exchange outcomes.
    Fetch {
        #[command(flatten)]
        source: SourceArgs,

        /// Trade date (YYYYMMDD or YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        date: Option<String>,

        /// Also fetch daily prices for every exchange.
        #[arg(long, default_value_t = false)]
        with_prices: bool,

        /// Save successful tables as CSV snapshots under this directory.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        source: SourceArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Analyze {
            source,
            date,
            bypass_cache,
            no_term_structure,
            top,
        } => {
            let mut config = load_config(&source)?;
            config.cache.bypass = bypass_cache;
            if no_term_structure {
                config.analysis.include_term_structure = false;
            }
            run_analyze(config, trade_date(date.as_deref())?, top)
        }
        Commands::Fetch {
            source,
            date,
            with_prices,
            save,
        } => run_fetch(
            load_config(&source)?,
            trade_date(date.as_deref())?,
            with_prices,
            save,
        ),
        Commands::Config { source } => {
            print!("{}", load_config(&source)?.to_toml()?);
            Ok(())
        }
    }
}

/// File (or default) config with command-line overrides applied, validated.
fn load_config(args: &SourceArgs) -> Result<DashboardConfig> {
    let mut config = match &args.config {
        Some(path) => DashboardConfig::from_file(path)?,
        None => DashboardConfig::default(),
    };

    if let Some(kind) = args.source {
        config.source.kind = kind;
    }
    if let Some(url) = &args.base_url {
        config.source.base_url = url.clone();
    }
    if let Some(dir) = &args.snapshot_dir {
        config.source.snapshot_dir = dir.clone();
    }
    if !args.exchanges.is_empty() {
        config.fetch.exchanges = args.exchanges.clone();
    }
    if let Some(workers) = args.workers {
        config.fetch.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.fetch.timeout_secs = timeout;
    }

    config.validate()?;
    Ok(config)
}

fn trade_date(arg: Option<&str>) -> Result<NaiveDate> {
    match arg {
        Some(s) => parse_trade_date(s).map_err(|e| anyhow!("invalid date '{s}': {e}")),
        None => {
            let today = chrono::Local::now().date_naive();
            Ok(today.pred_opt().unwrap_or(today))
        }
    }
}

fn build_source(config: &DashboardConfig) -> Result<Arc<dyn ExchangeDataSource>> {
    let source: Arc<dyn ExchangeDataSource> = Arc::from(config.source.build()?);
    tracing::info!(source = source.name(), fingerprint = %source.fingerprint(), "data source ready");
    Ok(source)
}

// ── analyze ──────────────────────────────────────────────────────────

fn run_analyze(config: DashboardConfig, trade_date: NaiveDate, top: usize) -> Result<()> {
    let service = Arc::new(AnalysisService::with_system_clock(build_source(&config)?));
    println!(
        "Analyzing {} across {} exchanges via {}...",
        trade_date,
        config.fetch.exchanges.len(),
        service.source().name()
    );

    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (resp_tx, resp_rx) = mpsc::channel();
    let handle = spawn_worker(service, cmd_rx, resp_tx)?;

    cmd_tx.send(WorkerCommand::Analyze {
        trade_date,
        config: Box::new(config),
    })?;

    let mut failed = false;
    loop {
        match resp_rx.recv() {
            Ok(WorkerResponse::Progress(event)) => {
                let ex = event.exchange;
                match &event.status {
                    OutcomeStatus::Succeeded { rows } => println!(
                        "[{:>3}%] OK   {} ({}): {rows} rows",
                        event.percent(),
                        ex.code(),
                        ex.display_name()
                    ),
                    OutcomeStatus::Failed { reason } => println!(
                        "[{:>3}%] FAIL {} ({}): {reason}",
                        event.percent(),
                        ex.code(),
                        ex.display_name()
                    ),
                }
            }
            Ok(WorkerResponse::CycleDone {
                succeeded,
                failed: failures,
                total,
            }) => {
                println!("Fetch complete: {succeeded}/{total} succeeded, {failures} failed");
            }
            Ok(WorkerResponse::AnalysisComplete(report)) => {
                print_report(&report, top);
                break;
            }
            Ok(WorkerResponse::AnalysisFailed { error, failures }) => {
                eprintln!("Analysis failed: {error}");
                for (exchange, reason) in &failures {
                    eprintln!("  {} ({}): {reason}", exchange.code(), exchange.display_name());
                }
                failed = true;
                break;
            }
            Ok(WorkerResponse::CacheCleared) => {}
            Err(_) => bail!("worker exited before finishing the analysis"),
        }
    }

    let _ = cmd_tx.send(WorkerCommand::Shutdown);
    handle
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))?;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &DashboardReport, top: usize) {
    println!();
    println!(
        "Position ranks for {}: {} rows, {} contracts{}",
        report.trade_date,
        report.positions.row_count(),
        report.contracts.len(),
        if report.from_cache() { " (cached)" } else { "" }
    );

    for id in StrategyId::ALL {
        let ranking = report.ranking(id);
        println!();
        println!("== {} ({}) ==", id.title(), id.name());
        print_ranked("Bullish", &ranking.bullish, top);
        print_ranked("Bearish", &ranking.bearish, top);
        println!("Neutral: {}", ranking.neutral);
    }

    let outlook = report.outlook();
    println!();
    println!(
        "Market outlook: {} ({}/{} contracts bullish, {:.1}%)",
        outlook.outlook,
        outlook.bullish,
        outlook.total,
        outlook.ratio * 100.0
    );

    let opps = report.opportunities();
    println!("Long opportunities:  {}", join_or_none(&opps.long));
    println!("Short opportunities: {}", join_or_none(&opps.short));

    if let Some(curves) = &report.term_structure {
        println!();
        println!("== Term structure ==");
        println!("{:<8} {:<14} {:>9}  Contracts", "Variety", "Shape", "Points");
        println!("{}", "-".repeat(60));
        for curve in curves {
            println!(
                "{:<8} {:<14} {:>9}  {}",
                curve.variety,
                curve.shape.to_string(),
                curve.points.len(),
                curve_line(curve)
            );
        }
        for (exchange, reason) in &report.price_failures {
            println!("  prices unavailable for {}: {reason}", exchange.code());
        }
    }
    if let Some(warning) = &report.price_warning {
        println!();
        println!("Term structure unavailable: {warning}");
    }

    if !report.skipped.is_empty() {
        println!();
        println!("Skipped {} contracts:", report.skipped.len());
        for skip in &report.skipped {
            println!("  {}: {}", skip.key, skip.reason);
        }
    }

    println!();
    match report.status() {
        CycleStatus::Complete => println!(
            "Status: complete ({} of {} exchanges) in {:.1}s",
            report.positions.succeeded.len(),
            report.positions.requested(),
            report.elapsed.as_secs_f64()
        ),
        CycleStatus::Partial {
            succeeded,
            requested,
        } => {
            println!(
                "Status: partial ({succeeded} of {requested} exchanges) in {:.1}s",
                report.elapsed.as_secs_f64()
            );
            for (exchange, reason) in &report.positions.failed {
                println!("  {} ({}): {reason}", exchange.code(), exchange.display_name());
            }
        }
        CycleStatus::Failed => println!("Status: failed"),
    }
}

fn print_ranked(label: &str, signals: &[RankedSignal], top: usize) {
    if signals.is_empty() {
        println!("{label}: none");
        return;
    }
    println!("{label}:");
    for (i, signal) in signals.iter().take(top).enumerate() {
        println!(
            "  {:>2}. {:<20} {:>12.4}  {}",
            i + 1,
            signal.key,
            signal.strength,
            signal.reason
        );
    }
    if signals.len() > top {
        println!("  ... {} more", signals.len() - top);
    }
}

/// Closes along the curve with the percent step between neighbours,
/// e.g. `a2409=100 (+2.00%) a2411=102`.
fn curve_line(curve: &TermStructure) -> String {
    let spreads = curve.spreads();
    let mut parts = Vec::with_capacity(curve.points.len() * 2);
    for (i, point) in curve.points.iter().enumerate() {
        if i > 0 {
            parts.push(match spreads.get(i - 1).copied().flatten() {
                Some(step) => format!("({step:+.2}%)"),
                None => "(n/a)".to_string(),
            });
        }
        parts.push(format!("{}={}", point.symbol, point.close));
    }
    parts.join(" ")
}

fn join_or_none(keys: &[String]) -> String {
    if keys.is_empty() {
        "none".to_string()
    } else {
        keys.join(", ")
    }
}

// ── fetch ────────────────────────────────────────────────────────────

fn run_fetch(
    config: DashboardConfig,
    trade_date: NaiveDate,
    with_prices: bool,
    save: Option<PathBuf>,
) -> Result<()> {
    let source = build_source(&config)?;
    let writer = save.map(SnapshotWriter::new);

    let positions_source = Arc::clone(&source);
    let outcomes = orchestrator::run(
        &config.fetch.exchanges,
        trade_date,
        &config.fetch_options(),
        move |ex, date| positions_source.position_ranks(ex, date),
        &StdoutProgress,
    )?;
    print_outcomes("Position ranks", &outcomes);
    let positions = aggregate(trade_date, &outcomes);

    if let Some(writer) = &writer {
        let files = writer.write_positions(trade_date, &positions.rows)?;
        println!("Saved {files} position tables to {}", writer_root(writer));
    }

    if with_prices {
        let prices_source = Arc::clone(&source);
        let outcomes = orchestrator::run(
            &Exchange::DAILY_PRICES,
            trade_date,
            &config.fetch_options(),
            move |ex, date| prices_source.daily_prices(ex, date),
            &StdoutProgress,
        )?;
        print_outcomes("Daily prices", &outcomes);
        if let Some(writer) = &writer {
            let prices = aggregate(trade_date, &outcomes);
            let files = writer.write_prices(trade_date, &prices.rows)?;
            println!("Saved {files} price files to {}", writer_root(writer));
        }
    }

    if positions.status() == CycleStatus::Failed {
        eprintln!("No exchange returned position ranks for {trade_date}");
        std::process::exit(1);
    }
    Ok(())
}

fn writer_root(writer: &SnapshotWriter) -> String {
    writer.root().display().to_string()
}

fn print_outcomes<T: Tabular>(title: &str, outcomes: &[FetchOutcome<T>]) {
    println!();
    println!("{title}:");
    println!("{:<8} {:<22} {:<6} {:>8} {:>10}  Detail", "Code", "Exchange", "Status", "Rows", "Elapsed");
    println!("{}", "-".repeat(70));
    for outcome in outcomes {
        let ex = outcome.exchange();
        let (status, rows, detail) = match &outcome.result {
            Ok(data) => ("ok", data.row_count().to_string(), String::new()),
            Err(reason) => ("failed", "-".to_string(), reason.to_string()),
        };
        println!(
            "{:<8} {:<22} {:<6} {:>8} {:>9.2}s  {}",
            ex.code(),
            ex.display_name(),
            status,
            rows,
            outcome.elapsed.as_secs_f64(),
            detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posrank_runner::{CurvePoint, CurveShape};

    fn point(symbol: &str, close: f64) -> CurvePoint {
        CurvePoint {
            symbol: symbol.into(),
            close,
        }
    }

    #[test]
    fn curve_line_shows_steps_between_contracts() {
        let curve = TermStructure {
            variety: "a".into(),
            shape: CurveShape::Contango,
            points: vec![point("a2409", 100.0), point("a2411", 102.0), point("a2501", 102.0)],
        };
        assert_eq!(curve_line(&curve), "a2409=100 (+2.00%) a2411=102 (+0.00%) a2501=102");
    }

    #[test]
    fn curve_line_marks_undefined_steps() {
        let curve = TermStructure {
            variety: "a".into(),
            shape: CurveShape::Flat,
            points: vec![point("a2409", 0.0), point("a2411", 5.0)],
        };
        assert_eq!(curve_line(&curve), "a2409=0 (n/a) a2411=5");
    }
}
