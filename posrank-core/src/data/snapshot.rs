//! CSV snapshot store for offline replay.
//!
//! Layout:
//! - `{root}/{YYYYMMDD}/{CODE}/positions/{contract}.csv` (one table per contract)
//! - `{root}/{YYYYMMDD}/{CODE}/daily.csv` (`symbol,variety,close`)
//!
//! Position tables keep the provider's column names as the header. Writes are
//! atomic: write to .tmp then rename.

use super::source::{DataError, ExchangeDataSource};
use crate::domain::{format_trade_date, DailyPrice, Exchange, PositionRow};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const DAILY_FILE: &str = "daily.csv";
const POSITIONS_DIR: &str = "positions";

fn exchange_dir(root: &Path, exchange: Exchange, trade_date: NaiveDate) -> PathBuf {
    root.join(format_trade_date(trade_date)).join(exchange.code())
}

fn snapshot_err(context: &str, path: &Path, e: impl std::fmt::Display) -> DataError {
    DataError::Snapshot(format!("{context} {}: {e}", path.display()))
}

/// Replays previously recorded snapshots as an ExchangeDataSource.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    root: PathBuf,
}

impl SnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Trade dates that have at least one exchange recorded, oldest first.
    pub fn available_dates(&self) -> Vec<NaiveDate> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                NaiveDate::parse_from_str(&e.file_name().to_string_lossy(), "%Y%m%d").ok()
            })
            .collect();
        dates.sort();
        dates
    }

    fn read_position_table(
        &self,
        exchange: Exchange,
        path: &Path,
    ) -> Result<Vec<PositionRow>, DataError> {
        let contract = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut rdr =
            csv::Reader::from_path(path).map_err(|e| snapshot_err("failed to open", path, e))?;
        let headers = rdr
            .headers()
            .map_err(|e| snapshot_err("bad header in", path, e))?
            .clone();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| snapshot_err("bad record in", path, e))?;
            let fields = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, value)| !value.is_empty())
                .map(|(column, value)| (column.to_string(), value.to_string()))
                .collect();
            rows.push(PositionRow {
                exchange,
                contract: contract.clone(),
                fields,
            });
        }
        Ok(rows)
    }
}

impl ExchangeDataSource for SnapshotSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn fingerprint(&self) -> String {
        format!("snapshot:{}", self.root.display())
    }

    fn position_ranks(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PositionRow>, DataError> {
        let dir = exchange_dir(&self.root, exchange, trade_date).join(POSITIONS_DIR);
        if !dir.is_dir() {
            return Err(DataError::NotFound {
                exchange,
                date: trade_date,
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| snapshot_err("failed to list", &dir, e))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();

        let mut rows = Vec::new();
        for path in &files {
            rows.extend(self.read_position_table(exchange, path)?);
        }
        Ok(rows)
    }

    fn daily_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyPrice>, DataError> {
        let path = exchange_dir(&self.root, exchange, trade_date).join(DAILY_FILE);
        if !path.is_file() {
            return Err(DataError::NotFound {
                exchange,
                date: trade_date,
            });
        }

        let mut rdr =
            csv::Reader::from_path(&path).map_err(|e| snapshot_err("failed to open", &path, e))?;
        let mut prices = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| snapshot_err("bad record in", &path, e))?;
            let symbol = record.get(0).unwrap_or_default().to_string();
            let variety = record.get(1).unwrap_or_default().to_string();
            let close = record.get(2).and_then(|c| c.trim().parse::<f64>().ok());
            prices.push(DailyPrice {
                exchange,
                symbol,
                variety,
                close,
            });
        }
        Ok(prices)
    }
}

/// Records fetched rows into the snapshot layout.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write position rows, one CSV per contract. Returns the number of files written.
    pub fn write_positions(
        &self,
        trade_date: NaiveDate,
        rows: &[PositionRow],
    ) -> Result<usize, DataError> {
        let mut tables: BTreeMap<(Exchange, &str), Vec<&PositionRow>> = BTreeMap::new();
        for row in rows {
            tables
                .entry((row.exchange, row.contract.as_str()))
                .or_default()
                .push(row);
        }

        for ((exchange, contract), table) in &tables {
            let dir = exchange_dir(&self.root, *exchange, trade_date).join(POSITIONS_DIR);
            fs::create_dir_all(&dir).map_err(|e| snapshot_err("failed to create", &dir, e))?;

            let columns: Vec<&str> = table
                .iter()
                .flat_map(|r| r.fields.keys().map(String::as_str))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let mut wtr = csv::Writer::from_writer(vec![]);
            wtr.write_record(&columns)
                .map_err(|e| DataError::Snapshot(e.to_string()))?;
            for row in table {
                wtr.write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))
                    .map_err(|e| DataError::Snapshot(e.to_string()))?;
            }
            let data = wtr
                .into_inner()
                .map_err(|e| DataError::Snapshot(format!("failed to flush CSV writer: {e}")))?;

            let file_name = format!("{}.csv", contract.replace(['/', '\\'], "_"));
            write_atomic(&dir.join(file_name), &data)?;
        }

        tracing::debug!(files = tables.len(), date = %trade_date, "position snapshots written");
        Ok(tables.len())
    }

    /// Write daily prices, one `daily.csv` per exchange. Returns the number of files written.
    pub fn write_prices(
        &self,
        trade_date: NaiveDate,
        prices: &[DailyPrice],
    ) -> Result<usize, DataError> {
        let mut by_exchange: BTreeMap<Exchange, Vec<&DailyPrice>> = BTreeMap::new();
        for price in prices {
            by_exchange.entry(price.exchange).or_default().push(price);
        }

        for (exchange, bars) in &by_exchange {
            let dir = exchange_dir(&self.root, *exchange, trade_date);
            fs::create_dir_all(&dir).map_err(|e| snapshot_err("failed to create", &dir, e))?;

            let mut wtr = csv::Writer::from_writer(vec![]);
            wtr.write_record(["symbol", "variety", "close"])
                .map_err(|e| DataError::Snapshot(e.to_string()))?;
            for bar in bars {
                let close = bar.close.map(|c| c.to_string()).unwrap_or_default();
                wtr.write_record([bar.symbol.as_str(), bar.variety.as_str(), close.as_str()])
                    .map_err(|e| DataError::Snapshot(e.to_string()))?;
            }
            let data = wtr
                .into_inner()
                .map_err(|e| DataError::Snapshot(format!("failed to flush CSV writer: {e}")))?;
            write_atomic(&dir.join(DAILY_FILE), &data)?;
        }

        Ok(by_exchange.len())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), DataError> {
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, data).map_err(|e| snapshot_err("failed to write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| snapshot_err("failed to rename into", path, e))
}
