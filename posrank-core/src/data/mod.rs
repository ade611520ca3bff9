//! Data retrieval: sources, fetch orchestration, aggregation and caching

pub mod aggregate;
pub mod aktools;
pub mod cache;
pub mod fetch;
pub mod memory;
pub mod orchestrator;
pub mod progress;
pub mod snapshot;
pub mod source;

pub use aggregate::{aggregate, AggregatedResult, CycleStatus, ExchangeRow};
pub use aktools::AkToolsSource;
pub use cache::{CacheKey, Clock, Lookup, ManualClock, SystemClock, TtlCache};
pub use fetch::{fetch_one, FetchFailure, FetchOutcome, FetchTask, Tabular};
pub use memory::{sample_seat_rows, MemorySource};
pub use orchestrator::{clamp_workers, FetchOptions, OrchestrationError, MAX_WORKERS, MIN_WORKERS};
pub use progress::{FetchProgress, NoProgress, OutcomeStatus, ProgressEvent, StdoutProgress};
pub use snapshot::{SnapshotSource, SnapshotWriter};
pub use source::{DataError, ExchangeDataSource};
