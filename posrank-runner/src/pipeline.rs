//! Analysis pipeline: cache lookup, fetch cycle, aggregation, then analysis.
//!
//! `AnalysisService` owns the data source and two TTL caches (position
//! ranks and daily prices). A cache hit skips the network entirely; a miss
//! runs one orchestrated fetch cycle and stores the aggregated dataset.
//! Cycles in which no exchange delivered data are returned as errors and
//! never cached.

use crate::normalize::{group_contracts, NormalizeError};
use crate::strategy::{analyze_contract, default_strategies, ContractAnalysis, StrategyId};
use crate::summary::{self, Opportunities, OutlookSummary, StrategyRanking};
use crate::term_structure::{analyze_term_structure, TermStructure};
use chrono::NaiveDate;
use posrank_core::config::{ConfigError, DashboardConfig};
use posrank_core::data::orchestrator::{self, OrchestrationError};
use posrank_core::data::{
    aggregate, AggregatedResult, CacheKey, Clock, CycleStatus, ExchangeDataSource, FetchFailure,
    FetchProgress, Lookup, NoProgress, SystemClock, TtlCache,
};
use posrank_core::domain::{DailyPrice, Exchange, PositionRow};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch cycle aborted: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("no exchange returned data for {trade_date}: {}", describe_failures(.failures))]
    AllExchangesFailed {
        trade_date: NaiveDate,
        failures: BTreeMap<Exchange, FetchFailure>,
    },
}

impl PipelineError {
    /// Per-exchange reasons, when the error came from a completed cycle.
    pub fn failures(&self) -> Option<&BTreeMap<Exchange, FetchFailure>> {
        match self {
            PipelineError::AllExchangesFailed { failures, .. } => Some(failures),
            _ => None,
        }
    }
}

fn describe_failures(failures: &BTreeMap<Exchange, FetchFailure>) -> String {
    failures
        .iter()
        .map(|(ex, reason)| format!("{ex}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A contract table that could not be analysed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedContract {
    pub key: String,
    pub reason: NormalizeError,
}

/// Everything one analysis run produced.
#[derive(Debug, Clone)]
pub struct DashboardReport {
    pub trade_date: NaiveDate,
    pub positions: Arc<AggregatedResult<PositionRow>>,
    /// How the position dataset was obtained.
    pub lookup: Lookup,
    /// Contracts in the order their rows were fetched.
    pub contracts: Vec<ContractAnalysis>,
    pub skipped: Vec<SkippedContract>,
    /// None when term structure was not requested or the price fetch failed.
    pub term_structure: Option<Vec<TermStructure>>,
    pub price_failures: BTreeMap<Exchange, FetchFailure>,
    /// Set when the price fetch failed as a whole.
    pub price_warning: Option<String>,
    pub elapsed: Duration,
}

impl DashboardReport {
    pub fn status(&self) -> CycleStatus {
        self.positions.status()
    }

    pub fn from_cache(&self) -> bool {
        self.lookup == Lookup::Hit
    }

    pub fn ranking(&self, strategy: StrategyId) -> StrategyRanking {
        summary::ranked(&self.contracts, strategy)
    }

    pub fn outlook(&self) -> OutlookSummary {
        summary::market_outlook(&self.contracts)
    }

    pub fn opportunities(&self) -> Opportunities {
        summary::opportunities(&self.contracts)
    }
}

type PositionCache = TtlCache<CacheKey, AggregatedResult<PositionRow>>;
type PriceCache = TtlCache<CacheKey, AggregatedResult<DailyPrice>>;

/// Runs fetch cycles and analysis against one data source.
pub struct AnalysisService {
    source: Arc<dyn ExchangeDataSource>,
    positions: PositionCache,
    prices: PriceCache,
}

impl AnalysisService {
    pub fn new(source: Arc<dyn ExchangeDataSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            positions: TtlCache::new(Arc::clone(&clock)),
            prices: TtlCache::new(clock),
        }
    }

    pub fn with_system_clock(source: Arc<dyn ExchangeDataSource>) -> Self {
        Self::new(source, Arc::new(SystemClock))
    }

    pub fn source(&self) -> &dyn ExchangeDataSource {
        self.source.as_ref()
    }

    /// Position ranks for `trade_date`, from the cache or a fresh fetch cycle.
    pub fn fetch_positions(
        &self,
        trade_date: NaiveDate,
        config: &DashboardConfig,
        progress: &dyn FetchProgress,
    ) -> Result<(Arc<AggregatedResult<PositionRow>>, Lookup), PipelineError> {
        let key = config.position_cache_key(trade_date, &self.source.fingerprint());
        self.positions.get_or_compute(
            &key,
            config.position_ttl(),
            config.cache.bypass,
            || {
                let source = Arc::clone(&self.source);
                let outcomes = orchestrator::run(
                    &config.fetch.exchanges,
                    trade_date,
                    &config.fetch_options(),
                    move |ex, date| source.position_ranks(ex, date),
                    progress,
                )?;
                completed_cycle(trade_date, aggregate(trade_date, &outcomes))
            },
        )
    }

    /// Daily prices for every exchange on `trade_date`, from the cache or a fresh fetch cycle.
    pub fn fetch_prices(
        &self,
        trade_date: NaiveDate,
        config: &DashboardConfig,
        progress: &dyn FetchProgress,
    ) -> Result<(Arc<AggregatedResult<DailyPrice>>, Lookup), PipelineError> {
        let key = config.price_cache_key(trade_date, &self.source.fingerprint());
        self.prices.get_or_compute(
            &key,
            config.price_ttl(),
            config.cache.bypass,
            || {
                let source = Arc::clone(&self.source);
                let outcomes = orchestrator::run(
                    &Exchange::DAILY_PRICES,
                    trade_date,
                    &config.fetch_options(),
                    move |ex, date| source.daily_prices(ex, date),
                    progress,
                )?;
                completed_cycle(trade_date, aggregate(trade_date, &outcomes))
            },
        )
    }

    /// Fetch (or reuse) the day's positions, analyse every contract, and
    /// optionally classify term structures.
    pub fn run(
        &self,
        trade_date: NaiveDate,
        config: &DashboardConfig,
        progress: &dyn FetchProgress,
    ) -> Result<DashboardReport, PipelineError> {
        let started = Instant::now();
        let mut config = config.clone();
        config.validate()?;

        let (positions, lookup) = self.fetch_positions(trade_date, &config, progress)?;
        tracing::info!(
            date = %trade_date,
            rows = positions.row_count(),
            ?lookup,
            "positions ready"
        );

        let (contracts, skipped) = analyze_positions(&positions, &config);

        let mut term_structure = None;
        let mut price_failures = BTreeMap::new();
        let mut price_warning = None;
        if config.analysis.include_term_structure {
            match self.fetch_prices(trade_date, &config, &NoProgress) {
                Ok((prices, _)) => {
                    term_structure = Some(analyze_term_structure(&prices.rows));
                    price_failures = prices.failed.clone();
                }
                Err(e) => {
                    tracing::warn!(date = %trade_date, error = %e, "term structure unavailable");
                    price_warning = Some(e.to_string());
                }
            }
        }

        Ok(DashboardReport {
            trade_date,
            positions,
            lookup,
            contracts,
            skipped,
            term_structure,
            price_failures,
            price_warning,
            elapsed: started.elapsed(),
        })
    }

    /// Forget every cached dataset.
    pub fn clear_cache(&self) {
        self.positions.clear();
        self.prices.clear();
        tracing::debug!("caches cleared");
    }
}

fn completed_cycle<R>(
    trade_date: NaiveDate,
    agg: AggregatedResult<R>,
) -> Result<AggregatedResult<R>, PipelineError> {
    if agg.status() == CycleStatus::Failed {
        return Err(PipelineError::AllExchangesFailed {
            trade_date,
            failures: agg.failed,
        });
    }
    Ok(agg)
}

/// Normalise and analyse every contract table in parallel.
///
/// Output keeps the order in which contracts first appear in the rows.
pub fn analyze_positions(
    positions: &AggregatedResult<PositionRow>,
    config: &DashboardConfig,
) -> (Vec<ContractAnalysis>, Vec<SkippedContract>) {
    let strategies = default_strategies(&config.analysis);
    let top_seats = config.analysis.top_seats;

    let results: Vec<Result<ContractAnalysis, SkippedContract>> = group_contracts(&positions.rows)
        .par_iter()
        .map(|group| {
            group
                .normalize(top_seats)
                .map(|contract| analyze_contract(&contract, &strategies))
                .map_err(|reason| SkippedContract {
                    key: group.key(),
                    reason,
                })
        })
        .collect();

    let mut contracts = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for result in results {
        match result {
            Ok(analysis) => contracts.push(analysis),
            Err(skip) => {
                tracing::debug!(contract = %skip.key, reason = %skip.reason, "contract skipped");
                skipped.push(skip);
            }
        }
    }
    (contracts, skipped)
}
