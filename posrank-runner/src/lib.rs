//! Posrank Runner — seat analysis on top of the fetched position ranks.
//!
//! This crate builds on `posrank-core` to provide:
//! - Per-contract normalisation of raw member rank tables
//! - Seat strategies (power change, spider web, retail reverse)
//! - Term-structure classification from daily closes
//! - Rankings, market outlook and cross-strategy opportunities
//! - A cached analysis service and a background worker thread

pub mod normalize;
pub mod pipeline;
pub mod strategy;
pub mod summary;
pub mod term_structure;
pub mod worker;

pub use normalize::{
    contract_key, group_contracts, parse_number, ContractPositions, ContractRows, NormalizeError,
    PositionTotals, Seat, DEFAULT_TOP_SEATS,
};
pub use pipeline::{analyze_positions, AnalysisService, DashboardReport, PipelineError, SkippedContract};
pub use strategy::{
    analyze_contract, default_strategies, ContractAnalysis, Direction, PowerChange, RetailReverse,
    SeatActivity, SpiderWeb, Strategy, StrategyId, StrategySignal,
};
pub use summary::{
    market_outlook, opportunities, ranked, MarketOutlook, Opportunities, OutlookSummary,
    RankedSignal, StrategyRanking, OPPORTUNITY_DEPTH,
};
pub use term_structure::{analyze_term_structure, CurvePoint, CurveShape, TermStructure};
pub use worker::{spawn_worker, WorkerCommand, WorkerResponse};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn analysis_types_are_send_sync() {
        assert_send::<ContractPositions>();
        assert_sync::<ContractPositions>();
        assert_send::<ContractAnalysis>();
        assert_sync::<ContractAnalysis>();
        assert_send::<TermStructure>();
        assert_sync::<TermStructure>();
    }

    #[test]
    fn service_is_shareable_with_the_worker() {
        assert_send::<AnalysisService>();
        assert_sync::<AnalysisService>();
        assert_send::<Box<dyn Strategy>>();
        assert_sync::<Box<dyn Strategy>>();
    }

    #[test]
    fn worker_messages_cross_threads() {
        assert_send::<WorkerCommand>();
        assert_send::<WorkerResponse>();
        assert_send::<DashboardReport>();
        assert_send::<PipelineError>();
    }
}
