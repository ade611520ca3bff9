//! In-memory scripted data source.
//!
//! Each exchange can be told to return rows, fail, panic, or sleep first.
//! Used for offline demos, tests, and benches.

use super::source::{DataError, ExchangeDataSource};
use crate::domain::{DailyPrice, Exchange, PositionRow};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Respond<T> {
    Data(T),
    Error(String),
    Panic(String),
}

/// Scripted ExchangeDataSource.
#[derive(Debug, Default)]
pub struct MemorySource {
    positions: HashMap<Exchange, Respond<Vec<PositionRow>>>,
    prices: HashMap<Exchange, Respond<Vec<DailyPrice>>>,
    delays: HashMap<Exchange, Duration>,
    default_delay: Duration,
    calls: Mutex<HashMap<Exchange, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(mut self, exchange: Exchange, rows: Vec<PositionRow>) -> Self {
        self.positions.insert(exchange, Respond::Data(rows));
        self
    }

    pub fn with_error(mut self, exchange: Exchange, message: impl Into<String>) -> Self {
        self.positions
            .insert(exchange, Respond::Error(message.into()));
        self
    }

    pub fn with_panic(mut self, exchange: Exchange, message: impl Into<String>) -> Self {
        self.positions
            .insert(exchange, Respond::Panic(message.into()));
        self
    }

    pub fn with_prices(mut self, exchange: Exchange, prices: Vec<DailyPrice>) -> Self {
        self.prices.insert(exchange, Respond::Data(prices));
        self
    }

    pub fn with_price_error(mut self, exchange: Exchange, message: impl Into<String>) -> Self {
        self.prices.insert(exchange, Respond::Error(message.into()));
        self
    }

    /// Sleep this long before answering for `exchange`.
    pub fn with_delay(mut self, exchange: Exchange, delay: Duration) -> Self {
        self.delays.insert(exchange, delay);
        self
    }

    /// Sleep this long before answering for exchanges without their own delay.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Number of calls (positions + prices) made for `exchange`.
    pub fn calls(&self, exchange: Exchange) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(&exchange).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|c| c.values().sum()).unwrap_or(0)
    }

    fn answer<T: Clone>(
        &self,
        script: &HashMap<Exchange, Respond<T>>,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<T, DataError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(exchange).or_insert(0) += 1;
        }
        let delay = self
            .delays
            .get(&exchange)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match script.get(&exchange) {
            Some(Respond::Data(rows)) => Ok(rows.clone()),
            Some(Respond::Error(message)) => Err(DataError::Other(message.clone())),
            Some(Respond::Panic(message)) => panic!("{message}"),
            None => Err(DataError::NotFound {
                exchange,
                date: trade_date,
            }),
        }
    }
}

impl ExchangeDataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn position_ranks(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PositionRow>, DataError> {
        self.answer(&self.positions, exchange, trade_date)
    }

    fn daily_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyPrice>, DataError> {
        self.answer(&self.prices, exchange, trade_date)
    }
}

/// Deterministic seat rows in the provider's standard column layout.
///
/// Seat `i` holds `1000 + 100*i` long lots and `900 + 90*i` short lots; changes
/// alternate in sign so strategies see a mix of signals across contracts.
pub fn sample_seat_rows(exchange: Exchange, contract: &str, seats: usize) -> Vec<PositionRow> {
    (0..seats)
        .map(|i| {
            let long = 1000 + 100 * i as i64;
            let short = 900 + 90 * i as i64;
            let sign = if i % 2 == 0 { 1 } else { -1 };
            PositionRow::new(exchange, contract)
                .with("rank", (i + 1).to_string())
                .with("vol_party_name", format!("Member {i:02}"))
                .with("vol", (5000 + 250 * i as i64).to_string())
                .with("long_party_name", format!("Member {i:02}"))
                .with("long_open_interest", long.to_string())
                .with("long_open_interest_chg", (sign * (10 + i as i64)).to_string())
                .with("short_party_name", format!("Member {:02}", seats - 1 - i))
                .with("short_open_interest", short.to_string())
                .with("short_open_interest_chg", (-sign * (5 + i as i64)).to_string())
                .with("variety", contract.trim_end_matches(|c: char| c.is_ascii_digit()))
        })
        .collect()
}
