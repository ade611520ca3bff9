//! Dashboard configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file) is a valid
//! configuration. CLI flags are applied on top of the loaded values and the
//! result is checked with [`DashboardConfig::validate`].

use crate::data::aktools::AkToolsSource;
use crate::data::cache::CacheKey;
use crate::data::orchestrator::{clamp_workers, FetchOptions};
use crate::data::snapshot::SnapshotSource;
use crate::data::source::{DataError, ExchangeDataSource};
use crate::domain::Exchange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest fetch cycle a config may ask for (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent fetch workers, clamped to 1..=5.
    pub max_workers: usize,
    /// Deadline for the whole fetch cycle, in seconds.
    pub timeout_secs: f64,
    pub exchanges: Vec<Exchange>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            timeout_secs: 60.0,
            exchanges: Exchange::POSITION_RANK.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub price_ttl_secs: u64,
    /// Skip cache lookups and always refetch (the fresh result is still stored).
    pub bypass: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            price_ttl_secs: 1800,
            bypass: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub include_term_structure: bool,
    /// Seats per contract table that take part in the analysis.
    pub top_seats: usize,
    /// Share of seats (by activity) treated as informed traders.
    pub informed_fraction: f64,
    /// Member names treated as retail-dominated brokers.
    pub retail_seats: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            include_term_structure: true,
            top_seats: 20,
            informed_fraction: 0.4,
            retail_seats: vec![
                "东方财富".to_string(),
                "平安期货".to_string(),
                "徽商期货".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Aktools,
    Snapshot,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Aktools => f.write_str("aktools"),
            SourceKind::Snapshot => f.write_str("snapshot"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aktools" => Ok(SourceKind::Aktools),
            "snapshot" => Ok(SourceKind::Snapshot),
            other => Err(format!("unknown source '{other}' (expected aktools or snapshot)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub base_url: String,
    pub snapshot_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Aktools,
            base_url: "http://127.0.0.1:8080".to_string(),
            snapshot_dir: PathBuf::from("snapshots"),
            request_timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    /// Construct the configured data source.
    pub fn build(&self) -> Result<Box<dyn ExchangeDataSource>, DataError> {
        match self.kind {
            SourceKind::Aktools => Ok(Box::new(AkToolsSource::new(
                self.base_url.clone(),
                Duration::from_secs(self.request_timeout_secs),
            )?)),
            SourceKind::Snapshot => Ok(Box::new(SnapshotSource::new(self.snapshot_dir.clone()))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub analysis: AnalysisConfig,
    pub source: SourceConfig,
}

/// Inputs that change what a cached dataset contains.
#[derive(Serialize)]
struct CacheFlags<'a> {
    dataset: &'static str,
    exchanges: Vec<Exchange>,
    source: &'a str,
    include_term_structure: bool,
}

impl DashboardConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges, clamping the worker count instead of rejecting it.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let clamped = clamp_workers(self.fetch.max_workers);
        if clamped != self.fetch.max_workers {
            tracing::warn!(
                requested = self.fetch.max_workers,
                using = clamped,
                "max_workers out of range, clamped"
            );
            self.fetch.max_workers = clamped;
        }
        if !(self.fetch.timeout_secs > 0.0 && self.fetch.timeout_secs <= MAX_TIMEOUT_SECS) {
            return Err(ConfigError::Invalid(format!(
                "fetch.timeout_secs must be in (0, {MAX_TIMEOUT_SECS}], got {}",
                self.fetch.timeout_secs
            )));
        }
        if self.fetch.exchanges.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.exchanges must name at least one exchange".into(),
            ));
        }
        if !(self.analysis.informed_fraction > 0.0 && self.analysis.informed_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "analysis.informed_fraction must be in (0, 1), got {}",
                self.analysis.informed_fraction
            )));
        }
        if self.analysis.top_seats == 0 {
            return Err(ConfigError::Invalid(
                "analysis.top_seats must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        let timeout = Duration::try_from_secs_f64(self.fetch.timeout_secs)
            .unwrap_or(FetchOptions::default().timeout);
        FetchOptions::new(self.fetch.max_workers, timeout)
    }

    pub fn position_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.price_ttl_secs)
    }

    /// Cache key for the position-rank dataset of `trade_date`.
    ///
    /// The exchange set is order-insensitive.
    pub fn position_cache_key(&self, trade_date: NaiveDate, source_fingerprint: &str) -> CacheKey {
        self.cache_key("positions", &self.fetch.exchanges, trade_date, source_fingerprint)
    }

    /// Cache key for the daily-price dataset of `trade_date`.
    pub fn price_cache_key(&self, trade_date: NaiveDate, source_fingerprint: &str) -> CacheKey {
        self.cache_key("prices", &Exchange::DAILY_PRICES, trade_date, source_fingerprint)
    }

    fn cache_key(
        &self,
        dataset: &'static str,
        exchanges: &[Exchange],
        trade_date: NaiveDate,
        source: &str,
    ) -> CacheKey {
        let mut exchanges = exchanges.to_vec();
        exchanges.sort();
        exchanges.dedup();
        CacheKey::from_flags(
            trade_date,
            &CacheFlags {
                dataset,
                exchanges,
                source,
                include_term_structure: self.analysis.include_term_structure,
            },
        )
    }
}
