//! Domain types: exchanges, raw seat rows, daily prices, trade dates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A futures exchange whose data is fetched independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// Dalian Commodity Exchange.
    Dce,
    /// China Financial Futures Exchange.
    Cffex,
    /// Zhengzhou Commodity Exchange.
    Czce,
    /// Shanghai Futures Exchange.
    Shfe,
    /// Guangzhou Futures Exchange.
    Gfex,
    /// Shanghai International Energy Exchange (daily prices only).
    Ine,
}

impl Exchange {
    /// Exchanges that publish member position-rank tables.
    pub const POSITION_RANK: [Exchange; 5] = [
        Exchange::Dce,
        Exchange::Cffex,
        Exchange::Czce,
        Exchange::Shfe,
        Exchange::Gfex,
    ];

    /// Exchanges queried for daily settlement prices.
    pub const DAILY_PRICES: [Exchange; 6] = [
        Exchange::Dce,
        Exchange::Cffex,
        Exchange::Ine,
        Exchange::Czce,
        Exchange::Shfe,
        Exchange::Gfex,
    ];

    /// Market code used by the upstream provider.
    pub fn code(self) -> &'static str {
        match self {
            Exchange::Dce => "DCE",
            Exchange::Cffex => "CFFEX",
            Exchange::Czce => "CZCE",
            Exchange::Shfe => "SHFE",
            Exchange::Gfex => "GFEX",
            Exchange::Ine => "INE",
        }
    }

    /// Display name as the exchanges publish it.
    pub fn display_name(self) -> &'static str {
        match self {
            Exchange::Dce => "大商所",
            Exchange::Cffex => "中金所",
            Exchange::Czce => "郑商所",
            Exchange::Shfe => "上期所",
            Exchange::Gfex => "广期所",
            Exchange::Ine => "上海国际能源交易中心",
        }
    }

    pub fn publishes_position_ranks(self) -> bool {
        !matches!(self, Exchange::Ine)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown exchange code '{0}' (expected one of DCE, CFFEX, CZCE, SHFE, GFEX, INE)")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DCE" => Ok(Exchange::Dce),
            "CFFEX" => Ok(Exchange::Cffex),
            "CZCE" => Ok(Exchange::Czce),
            "SHFE" => Ok(Exchange::Shfe),
            "GFEX" => Ok(Exchange::Gfex),
            "INE" => Ok(Exchange::Ine),
            _ => Err(UnknownExchange(s.to_string())),
        }
    }
}

/// One raw seat record from an exchange's position-rank table.
///
/// Cells are kept as the provider returned them. Column names differ between
/// exchanges; reconciling them is left to the analysis layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRow {
    pub exchange: Exchange,
    /// Contract or variety the table belongs to (e.g. `cu2409`, `IF`).
    pub contract: String,
    pub fields: BTreeMap<String, String>,
}

impl PositionRow {
    pub fn new(exchange: Exchange, contract: impl Into<String>) -> Self {
        Self {
            exchange,
            contract: contract.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style cell setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// One daily bar for a single contract, used by the term-structure analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrice {
    pub exchange: Exchange,
    /// Full contract symbol, e.g. `RB2410`.
    pub symbol: String,
    /// Variety code shared by all delivery months, e.g. `RB`.
    pub variety: String,
    pub close: Option<f64>,
}

/// Parse a trade date given as `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_trade_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    let s = s.trim();
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        NaiveDate::parse_from_str(s, "%Y%m%d")
    } else {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
    }
}

/// Format a trade date the way the upstream provider expects it (`YYYYMMDD`).
pub fn format_trade_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
