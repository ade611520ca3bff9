//! Posrank Core — exchange data sources, bounded concurrent fetch, aggregation, caching.
//!
//! This crate contains the data side of the position-rank dashboard:
//! - Domain types (exchanges, raw seat rows, daily prices)
//! - Data sources: AKTools HTTP gateway, CSV snapshots, scripted in-memory
//! - Single-exchange fetcher and bounded concurrent orchestrator
//! - Aggregation of per-exchange outcomes into one dataset
//! - TTL cache with an injectable clock
//! - TOML configuration

pub mod config;
pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything handed between fetch workers and the
    /// presentation thread is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::PositionRow>();
        require_sync::<domain::PositionRow>();
        require_send::<domain::DailyPrice>();
        require_sync::<domain::DailyPrice>();

        require_send::<data::FetchOutcome<Vec<domain::PositionRow>>>();
        require_send::<data::AggregatedResult<domain::PositionRow>>();
        require_sync::<data::AggregatedResult<domain::PositionRow>>();
        require_send::<data::ProgressEvent>();
        require_sync::<data::ProgressEvent>();
        require_send::<data::TtlCache<data::CacheKey, u32>>();
        require_sync::<data::TtlCache<data::CacheKey, u32>>();

        require_send::<config::DashboardConfig>();
        require_sync::<config::DashboardConfig>();
    }
}
