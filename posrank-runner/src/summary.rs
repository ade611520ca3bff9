//! Cross-contract summaries: per-strategy rankings, market outlook, and
//! contracts where two strategies agree.

use crate::strategy::{ContractAnalysis, Direction, StrategyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Contracts considered per strategy when looking for agreement.
pub const OPPORTUNITY_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSignal {
    pub key: String,
    pub strength: f64,
    pub reason: String,
}

/// One strategy's signals split by direction, strongest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRanking {
    pub strategy: StrategyId,
    pub bullish: Vec<RankedSignal>,
    pub bearish: Vec<RankedSignal>,
    pub neutral: usize,
}

/// Rank every contract's signal for `strategy`. Ties keep input order.
pub fn ranked(results: &[ContractAnalysis], strategy: StrategyId) -> StrategyRanking {
    let mut bullish = Vec::new();
    let mut bearish = Vec::new();
    let mut neutral = 0;

    for result in results {
        let Some(signal) = result.signal(strategy) else {
            continue;
        };
        let entry = RankedSignal {
            key: result.key.clone(),
            strength: signal.strength,
            reason: signal.reason.clone(),
        };
        match signal.direction {
            Direction::Bullish => bullish.push(entry),
            Direction::Bearish => bearish.push(entry),
            Direction::Neutral => neutral += 1,
        }
    }

    bullish.sort_by(|a: &RankedSignal, b| b.strength.total_cmp(&a.strength));
    bearish.sort_by(|a: &RankedSignal, b| b.strength.total_cmp(&a.strength));

    StrategyRanking {
        strategy,
        bullish,
        bearish,
        neutral,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketOutlook {
    Bullish,
    CautiouslyBullish,
    CautiouslyBearish,
    Bearish,
}

impl fmt::Display for MarketOutlook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketOutlook::Bullish => f.write_str("bullish"),
            MarketOutlook::CautiouslyBullish => f.write_str("cautiously bullish"),
            MarketOutlook::CautiouslyBearish => f.write_str("cautiously bearish"),
            MarketOutlook::Bearish => f.write_str("bearish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlookSummary {
    pub outlook: MarketOutlook,
    pub bullish: usize,
    pub total: usize,
    pub ratio: f64,
}

/// Overall outlook from the share of contracts the spider-web strategy reads as bullish.
pub fn market_outlook(results: &[ContractAnalysis]) -> OutlookSummary {
    let total = results.len();
    let bullish = results
        .iter()
        .filter(|r| {
            r.signal(StrategyId::SpiderWeb)
                .is_some_and(|s| s.direction == Direction::Bullish)
        })
        .count();
    let ratio = if total == 0 {
        0.0
    } else {
        bullish as f64 / total as f64
    };

    let outlook = if ratio > 0.7 {
        MarketOutlook::Bullish
    } else if ratio > 0.5 {
        MarketOutlook::CautiouslyBullish
    } else if ratio > 0.3 {
        MarketOutlook::CautiouslyBearish
    } else {
        MarketOutlook::Bearish
    };

    OutlookSummary {
        outlook,
        bullish,
        total,
        ratio,
    }
}

/// Contracts in the top ranks of both the power-change and spider-web strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunities {
    pub long: Vec<String>,
    pub short: Vec<String>,
}

pub fn opportunities(results: &[ContractAnalysis]) -> Opportunities {
    let power = ranked(results, StrategyId::PowerChange);
    let spider = ranked(results, StrategyId::SpiderWeb);

    let top = |signals: &[RankedSignal]| -> BTreeSet<String> {
        signals
            .iter()
            .take(OPPORTUNITY_DEPTH)
            .map(|s| s.key.clone())
            .collect()
    };

    Opportunities {
        long: top(&power.bullish)
            .intersection(&top(&spider.bullish))
            .cloned()
            .collect(),
        short: top(&power.bearish)
            .intersection(&top(&spider.bearish))
            .cloned()
            .collect(),
    }
}
