//! AKTools HTTP gateway data source.
//!
//! AKTools exposes the upstream provider's Python functions as JSON endpoints at
//! `{base_url}/api/public/{function}`. Each exchange has its own position-rank
//! function; daily prices share one function keyed by market code.
//!
//! Position-rank endpoints return either an object mapping contract to its seat
//! records, or a flat record array carrying a `symbol`/`variety` column. Both
//! shapes are accepted. Cells are kept as text; no column reconciliation
//! happens here.

use super::source::{DataError, ExchangeDataSource};
use crate::domain::{format_trade_date, DailyPrice, Exchange, PositionRow};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

type Record = Map<String, Value>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RankPayload {
    ByContract(BTreeMap<String, Vec<Record>>),
    Flat(Vec<Record>),
}

/// AKTools gateway client (blocking).
pub struct AkToolsSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl AkToolsSource {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("posrank/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upstream function that publishes an exchange's member rank table.
    pub fn rank_function(exchange: Exchange) -> Option<&'static str> {
        match exchange {
            Exchange::Dce => Some("futures_dce_position_rank"),
            Exchange::Cffex => Some("get_cffex_rank_table"),
            Exchange::Czce => Some("get_czce_rank_table"),
            Exchange::Shfe => Some("get_shfe_rank_table"),
            Exchange::Gfex => Some("futures_gfex_position_rank"),
            Exchange::Ine => None,
        }
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/api/public/{function}", self.base_url)
    }

    /// One GET with status mapping. No retries.
    fn get_json<T: DeserializeOwned>(
        &self,
        function: &str,
        query: &[(&str, String)],
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<T, DataError> {
        let resp = self
            .client
            .get(self.endpoint(function))
            .query(query)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::NotFound {
                exchange,
                date: trade_date,
            });
        }
        if !status.is_success() {
            return Err(DataError::Other(format!(
                "HTTP {status} from {function} for {exchange}"
            )));
        }

        resp.json::<T>().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse {function} response: {e}"))
        })
    }
}

impl ExchangeDataSource for AkToolsSource {
    fn name(&self) -> &str {
        "aktools"
    }

    fn fingerprint(&self) -> String {
        format!("aktools:{}", self.base_url)
    }

    fn position_ranks(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<PositionRow>, DataError> {
        let function = Self::rank_function(exchange).ok_or(DataError::Unsupported {
            exchange,
            what: "member position ranks",
        })?;
        let payload: RankPayload = self.get_json(
            function,
            &[("date", format_trade_date(trade_date))],
            exchange,
            trade_date,
        )?;
        Ok(rows_from_payload(exchange, payload))
    }

    fn daily_prices(
        &self,
        exchange: Exchange,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyPrice>, DataError> {
        let date = format_trade_date(trade_date);
        let records: Vec<Record> = self.get_json(
            "get_futures_daily",
            &[
                ("start_date", date.clone()),
                ("end_date", date),
                ("market", exchange.code().to_string()),
            ],
            exchange,
            trade_date,
        )?;
        records
            .iter()
            .map(|r| price_from_record(exchange, r))
            .collect()
    }
}

fn rows_from_payload(exchange: Exchange, payload: RankPayload) -> Vec<PositionRow> {
    match payload {
        RankPayload::ByContract(tables) => tables
            .into_iter()
            .flat_map(|(contract, records)| {
                records
                    .into_iter()
                    .map(move |r| row_from_record(exchange, &contract, r))
            })
            .collect(),
        RankPayload::Flat(records) => records
            .into_iter()
            .map(|r| {
                let contract = ["symbol", "variety"]
                    .iter()
                    .find_map(|k| r.get(*k).and_then(cell_text))
                    .unwrap_or_default();
                row_from_record(exchange, &contract, r)
            })
            .collect(),
    }
}

fn row_from_record(exchange: Exchange, contract: &str, record: Record) -> PositionRow {
    let fields = record
        .into_iter()
        .filter_map(|(k, v)| cell_text(&v).map(|text| (k, text)))
        .collect();
    PositionRow {
        exchange,
        contract: contract.to_string(),
        fields,
    }
}

/// Cell value as text; nulls are dropped.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn price_from_record(exchange: Exchange, record: &Record) -> Result<DailyPrice, DataError> {
    let symbol = record
        .get("symbol")
        .and_then(cell_text)
        .ok_or_else(|| DataError::ResponseFormatChanged("daily record without symbol".into()))?;
    let variety = record
        .get("variety")
        .and_then(cell_text)
        .unwrap_or_else(|| symbol.trim_end_matches(|c: char| c.is_ascii_digit()).to_string());
    let close = record.get("close").and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    });
    Ok(DailyPrice {
        exchange,
        symbol,
        variety,
        close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn by_contract_payload_keeps_contract_names() {
        let payload: RankPayload = serde_json::from_value(json!({
            "cu2409": [
                {"rank": 1, "long_party_name": "中信期货", "long_open_interest": "12,345", "vol": null},
                {"rank": 2, "long_party_name": "国泰君安", "long_open_interest": 9000}
            ],
            "al2409": [{"rank": 1}]
        }))
        .unwrap();
        let rows = rows_from_payload(Exchange::Shfe, payload);
        assert_eq!(rows.len(), 3);
        let cu: Vec<_> = rows.iter().filter(|r| r.contract == "cu2409").collect();
        assert_eq!(cu[0].get("long_open_interest"), Some("12,345"));
        assert_eq!(cu[1].get("long_open_interest"), Some("9000"));
        assert_eq!(cu[0].get("vol"), None, "null cells are dropped");
    }

    #[test]
    fn flat_payload_groups_by_symbol_column() {
        let payload: RankPayload = serde_json::from_value(json!([
            {"symbol": "IF2409", "rank": 1},
            {"variety": "IF", "rank": 2}
        ]))
        .unwrap();
        let rows = rows_from_payload(Exchange::Cffex, payload);
        assert_eq!(rows[0].contract, "IF2409");
        assert_eq!(rows[1].contract, "IF");
    }

    #[test]
    fn price_records_parse_numbers_and_text() {
        let rec: Record = serde_json::from_value(json!({"symbol": "RB2410", "close": "3,512"})).unwrap();
        let price = price_from_record(Exchange::Shfe, &rec).unwrap();
        assert_eq!(price.variety, "RB");
        assert_eq!(price.close, Some(3512.0));

        let missing: Record = serde_json::from_value(json!({"close": 1.0})).unwrap();
        assert!(price_from_record(Exchange::Shfe, &missing).is_err());
    }

    #[test]
    fn ine_has_no_rank_function() {
        assert!(AkToolsSource::rank_function(Exchange::Ine).is_none());
        let source = AkToolsSource::new("http://127.0.0.1:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.base_url(), "http://127.0.0.1:8080");
        assert_eq!(source.fingerprint(), "aktools:http://127.0.0.1:8080");
    }
}
