//! Per-contract normalisation of raw seat rows.
//!
//! Exchanges publish their member rank tables with slightly different column
//! names. This module reconciles the one known alias set (CZCE), keeps the
//! top seats, and parses the numeric cells into a typed table the strategies
//! can work on.

use posrank_core::domain::{Exchange, PositionRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub const LONG_PARTY: &str = "long_party_name";
pub const LONG_OI: &str = "long_open_interest";
pub const LONG_CHG: &str = "long_open_interest_chg";
pub const SHORT_PARTY: &str = "short_party_name";
pub const SHORT_OI: &str = "short_open_interest";
pub const SHORT_CHG: &str = "short_open_interest_chg";
pub const VOL: &str = "vol";

/// Columns every contract table must carry after alias reconciliation.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    LONG_PARTY, LONG_OI, LONG_CHG, SHORT_PARTY, SHORT_OI, SHORT_CHG, VOL,
];

/// CZCE column names and their standard equivalents.
const CZCE_ALIASES: [(&str, &str); 6] = [
    ("g_party_n", LONG_PARTY),
    ("open_inten", LONG_OI),
    ("inten_intert", LONG_CHG),
    ("t_party_n", SHORT_PARTY),
    ("open_inten.1", SHORT_OI),
    ("inten_intert.1", SHORT_CHG),
];

/// Default number of ranked seats kept per contract.
pub const DEFAULT_TOP_SEATS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{contract}: no seat rows")]
    Empty { contract: String },

    #[error("{contract}: missing columns {missing:?}")]
    MissingColumns {
        contract: String,
        missing: Vec<&'static str>,
    },
}

/// One rank position in a member table.
///
/// The long, short and volume rankings are published side by side, so the
/// parties on one row are usually different firms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub rank: usize,
    pub long_party: Option<String>,
    pub long_open_interest: Option<f64>,
    pub long_chg: Option<f64>,
    pub short_party: Option<String>,
    pub short_open_interest: Option<f64>,
    pub short_chg: Option<f64>,
    pub vol: Option<f64>,
}

/// Column sums over the kept seats, skipping blank cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionTotals {
    pub total_long: f64,
    pub total_short: f64,
    pub total_long_chg: f64,
    pub total_short_chg: f64,
    pub total_vol: f64,
}

/// A normalised member rank table for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPositions {
    pub exchange: Exchange,
    pub contract: String,
    pub seats: Vec<Seat>,
    pub totals: PositionTotals,
}

impl ContractPositions {
    /// Build a normalised table from the raw rows of one contract.
    pub fn from_rows(
        exchange: Exchange,
        contract: &str,
        rows: &[&PositionRow],
        top_seats: usize,
    ) -> Result<Self, NormalizeError> {
        if rows.is_empty() {
            return Err(NormalizeError::Empty {
                contract: contract.to_string(),
            });
        }

        let columns: BTreeSet<&str> = rows
            .iter()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();
        let aliased = columns.contains("g_party_n") && columns.contains("t_party_n");
        let present = |standard: &str| {
            columns.contains(standard)
                || (aliased && CZCE_ALIASES.iter().any(|(alias, s)| *s == standard && columns.contains(alias)))
        };

        let missing: Vec<&'static str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|&c| !present(c))
            .collect();
        if !missing.is_empty() {
            return Err(NormalizeError::MissingColumns {
                contract: contract.to_string(),
                missing,
            });
        }

        let cell = |row: &PositionRow, standard: &str| -> Option<String> {
            let raw = if aliased {
                CZCE_ALIASES
                    .iter()
                    .find(|(_, s)| *s == standard)
                    .and_then(|(alias, _)| row.get(alias))
                    .or_else(|| row.get(standard))
            } else {
                row.get(standard)
            };
            raw.map(str::to_string)
        };

        let seats: Vec<Seat> = rows
            .iter()
            .take(top_seats)
            .enumerate()
            .map(|(i, row)| Seat {
                rank: i + 1,
                long_party: cell(row, LONG_PARTY).and_then(party_name),
                long_open_interest: cell(row, LONG_OI).as_deref().and_then(parse_number),
                long_chg: cell(row, LONG_CHG).as_deref().and_then(parse_number),
                short_party: cell(row, SHORT_PARTY).and_then(party_name),
                short_open_interest: cell(row, SHORT_OI).as_deref().and_then(parse_number),
                short_chg: cell(row, SHORT_CHG).as_deref().and_then(parse_number),
                vol: cell(row, VOL).as_deref().and_then(parse_number),
            })
            .collect();

        let sum = |f: fn(&Seat) -> Option<f64>| seats.iter().filter_map(f).sum::<f64>();
        let totals = PositionTotals {
            total_long: sum(|s| s.long_open_interest),
            total_short: sum(|s| s.short_open_interest),
            total_long_chg: sum(|s| s.long_chg),
            total_short_chg: sum(|s| s.short_chg),
            total_vol: sum(|s| s.vol),
        };

        Ok(Self {
            exchange,
            contract: contract.to_string(),
            seats,
            totals,
        })
    }

    /// Display key, e.g. `上期所_cu2409`.
    pub fn key(&self) -> String {
        contract_key(self.exchange, &self.contract)
    }
}

pub fn contract_key(exchange: Exchange, contract: &str) -> String {
    format!("{}_{contract}", exchange.display_name())
}

/// Parse a provider cell as a number.
///
/// Thousands separators and spaces are stripped; blanks and the usual
/// placeholders (`nan`, `None`, `-`) are missing values.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty()
        || cleaned == "-"
        || cleaned.eq_ignore_ascii_case("nan")
        || cleaned.eq_ignore_ascii_case("none")
    {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn party_name(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Raw rows of one contract table.
#[derive(Debug, Clone)]
pub struct ContractRows<'a> {
    pub exchange: Exchange,
    pub contract: &'a str,
    pub rows: Vec<&'a PositionRow>,
}

impl ContractRows<'_> {
    pub fn key(&self) -> String {
        contract_key(self.exchange, self.contract)
    }

    pub fn normalize(&self, top_seats: usize) -> Result<ContractPositions, NormalizeError> {
        ContractPositions::from_rows(self.exchange, self.contract, &self.rows, top_seats)
    }
}

/// Group rows by `(exchange, contract)` in order of first appearance.
pub fn group_contracts(rows: &[PositionRow]) -> Vec<ContractRows<'_>> {
    let mut index: HashMap<(Exchange, &str), usize> = HashMap::new();
    let mut groups: Vec<ContractRows<'_>> = Vec::new();
    for row in rows {
        let slot = *index
            .entry((row.exchange, row.contract.as_str()))
            .or_insert_with(|| {
                groups.push(ContractRows {
                    exchange: row.exchange,
                    contract: row.contract.as_str(),
                    rows: Vec::new(),
                });
                groups.len() - 1
            });
        groups[slot].rows.push(row);
    }
    groups
}
