//! Exchange data source trait and structured error types.
//!
//! The ExchangeDataSource trait abstracts over where position-rank tables and
//! daily prices come from (the AKTools HTTP gateway, CSV snapshots, an
//! in-memory script) so the fetch layer can be driven by any of them.

use crate::domain::{DailyPrice, Exchange, PositionRow};
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for data-source calls.
///
/// These are displayable in both CLI and worker contexts; the fetch layer
/// turns them into per-exchange failure reasons.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("no data published by {exchange} for {date}")]
    NotFound { exchange: Exchange, date: NaiveDate },

    #[error("{exchange} does not publish {what}")]
    Unsupported {
        exchange: Exchange,
        what: &'static str,
    },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("data error: {0}")]
    Other(String),
}

/// A source of per-exchange market data for a single trade date.
///
/// Implementations perform one blocking call per invocation and must be
/// shareable across fetch workers. Retry policy belongs to callers.
pub trait ExchangeDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Identity of the data behind this source (endpoint, directory, ...).
    ///
    /// Two sources with the same fingerprint serve the same data, so cached
    /// results can be shared between them.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Member position-rank rows for every contract the exchange published.
    fn position_ranks(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PositionRow>, DataError>;

    /// Daily bars for every contract listed on the exchange.
    fn daily_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyPrice>, DataError>;
}
