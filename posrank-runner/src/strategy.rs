//! Seat-based strategies over a normalised contract table.
//!
//! Each strategy reads one `ContractPositions` and emits a directional
//! signal with a strength used for ranking. Strengths are only comparable
//! within a strategy.

use crate::normalize::ContractPositions;
use posrank_core::config::AnalysisConfig;
use posrank_core::domain::Exchange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => f.write_str("bullish"),
            Direction::Bearish => f.write_str("bearish"),
            Direction::Neutral => f.write_str("neutral"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub direction: Direction,
    pub strength: f64,
    pub reason: String,
}

impl StrategySignal {
    pub fn bullish(strength: f64, reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::Bullish,
            strength,
            reason: reason.into(),
        }
    }

    pub fn bearish(strength: f64, reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::Bearish,
            strength,
            reason: reason.into(),
        }
    }

    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::Neutral,
            strength: 0.0,
            reason: reason.into(),
        }
    }
}

/// Identifies a strategy in analysis results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyId {
    PowerChange,
    SpiderWeb,
    RetailReverse,
}

impl StrategyId {
    pub const ALL: [StrategyId; 3] = [
        StrategyId::PowerChange,
        StrategyId::SpiderWeb,
        StrategyId::RetailReverse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyId::PowerChange => "power_change",
            StrategyId::SpiderWeb => "spider_web",
            StrategyId::RetailReverse => "retail_reverse",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StrategyId::PowerChange => "多空力量变化策略",
            StrategyId::SpiderWeb => "蜘蛛网策略",
            StrategyId::RetailReverse => "家人席位反向操作策略",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A directional read of one contract's member positions.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn analyze(&self, contract: &ContractPositions) -> StrategySignal;
}

// ── Power change ─────────────────────────────────────────────────────

/// Longs adding while shorts cut is bullish; the reverse is bearish.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerChange;

impl Strategy for PowerChange {
    fn id(&self) -> StrategyId {
        StrategyId::PowerChange
    }

    fn analyze(&self, contract: &ContractPositions) -> StrategySignal {
        let long_chg = contract.totals.total_long_chg;
        let short_chg = contract.totals.total_short_chg;

        if long_chg > 0.0 && short_chg < 0.0 {
            StrategySignal::bullish(
                long_chg.abs(),
                format!("longs +{long_chg:.0} lots, shorts {short_chg:.0} lots"),
            )
        } else if long_chg < 0.0 && short_chg > 0.0 {
            StrategySignal::bearish(
                short_chg.abs(),
                format!("longs {long_chg:.0} lots, shorts +{short_chg:.0} lots"),
            )
        } else {
            StrategySignal::neutral(format!(
                "longs {long_chg:+.0} lots, shorts {short_chg:+.0} lots"
            ))
        }
    }
}

// ── Spider web ───────────────────────────────────────────────────────

/// Informed-trader sentiment (MSD).
///
/// Seats are ranked by `(long + short) / vol`. The top `informed_fraction`
/// are treated as informed traders; MSD is the difference between the mean
/// net bias `(long - short) / (long + short)` of informed and uninformed
/// seats.
#[derive(Debug, Clone, Copy)]
pub struct SpiderWeb {
    pub informed_fraction: f64,
}

impl Default for SpiderWeb {
    fn default() -> Self {
        Self {
            informed_fraction: 0.4,
        }
    }
}

impl SpiderWeb {
    pub fn new(informed_fraction: f64) -> Self {
        Self { informed_fraction }
    }

    /// MSD for a contract, or None when either group has no usable seat.
    pub fn msd(&self, contract: &ContractPositions) -> Option<f64> {
        let mut seats: Vec<(f64, f64, f64)> = contract
            .seats
            .iter()
            .filter_map(|s| match (s.vol, s.long_open_interest, s.short_open_interest) {
                (Some(vol), Some(long), Some(short)) if vol > 0.0 => {
                    Some(((long + short) / vol, long, short))
                }
                _ => None,
            })
            .collect();
        if seats.is_empty() {
            return None;
        }

        seats.sort_by(|a, b| b.0.total_cmp(&a.0));
        let cutoff = (seats.len() as f64 * self.informed_fraction).floor() as usize;
        let (informed, uninformed) = seats.split_at(cutoff.min(seats.len()));

        Some(mean_bias(informed)? - mean_bias(uninformed)?)
    }
}

fn mean_bias(seats: &[(f64, f64, f64)]) -> Option<f64> {
    let biases: Vec<f64> = seats
        .iter()
        .filter(|(_, long, short)| long + short != 0.0)
        .map(|(_, long, short)| (long - short) / (long + short))
        .collect();
    if biases.is_empty() {
        None
    } else {
        Some(biases.iter().sum::<f64>() / biases.len() as f64)
    }
}

impl Strategy for SpiderWeb {
    fn id(&self) -> StrategyId {
        StrategyId::SpiderWeb
    }

    fn analyze(&self, contract: &ContractPositions) -> StrategySignal {
        match self.msd(contract) {
            None => StrategySignal::neutral("no usable seats"),
            Some(msd) if msd > 0.0 => {
                StrategySignal::bullish(msd.abs(), format!("MSD={msd:.4}, informed seats net long"))
            }
            Some(msd) if msd < 0.0 => {
                StrategySignal::bearish(msd.abs(), format!("MSD={msd:.4}, informed seats net short"))
            }
            Some(msd) => StrategySignal::neutral(format!("MSD={msd:.4}, no clear bias")),
        }
    }
}

// ── Retail reverse ───────────────────────────────────────────────────

/// One retail seat's footprint in a contract table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatActivity {
    pub seat: String,
    pub long_chg: f64,
    pub short_chg: f64,
    pub long_pos: f64,
    pub short_pos: f64,
}

/// Fade retail-dominated brokers: their longs adding is bearish, their
/// shorts adding is bullish. Strength is their share of the side's open
/// interest.
#[derive(Debug, Clone)]
pub struct RetailReverse {
    pub seats: Vec<String>,
}

impl Default for RetailReverse {
    fn default() -> Self {
        Self::new(AnalysisConfig::default().retail_seats)
    }
}

impl RetailReverse {
    pub fn new(seats: Vec<String>) -> Self {
        Self { seats }
    }

    /// Retail seats with a nonzero position change, in configured order.
    pub fn seat_activity(&self, contract: &ContractPositions) -> Vec<SeatActivity> {
        let mut by_seat: BTreeMap<&str, SeatActivity> = BTreeMap::new();
        for seat in &contract.seats {
            if let Some(name) = seat.long_party.as_deref().filter(|n| self.is_retail(n)) {
                let entry = by_seat.entry(name).or_insert_with(|| SeatActivity::empty(name));
                entry.long_chg += seat.long_chg.unwrap_or(0.0);
                entry.long_pos += seat.long_open_interest.unwrap_or(0.0);
            }
            if let Some(name) = seat.short_party.as_deref().filter(|n| self.is_retail(n)) {
                let entry = by_seat.entry(name).or_insert_with(|| SeatActivity::empty(name));
                entry.short_chg += seat.short_chg.unwrap_or(0.0);
                entry.short_pos += seat.short_open_interest.unwrap_or(0.0);
            }
        }

        self.seats
            .iter()
            .filter_map(|name| by_seat.remove(name.as_str()))
            .filter(|a| a.long_chg != 0.0 || a.short_chg != 0.0)
            .collect()
    }

    fn is_retail(&self, name: &str) -> bool {
        self.seats.iter().any(|s| s == name)
    }
}

impl SeatActivity {
    fn empty(seat: &str) -> Self {
        Self {
            seat: seat.to_string(),
            long_chg: 0.0,
            short_chg: 0.0,
            long_pos: 0.0,
            short_pos: 0.0,
        }
    }
}

impl Strategy for RetailReverse {
    fn id(&self) -> StrategyId {
        StrategyId::RetailReverse
    }

    fn analyze(&self, contract: &ContractPositions) -> StrategySignal {
        let activity = self.seat_activity(contract);
        if activity.is_empty() {
            return StrategySignal::neutral("no retail seat activity");
        }

        let long_chg: f64 = activity.iter().map(|a| a.long_chg).sum();
        let short_chg: f64 = activity.iter().map(|a| a.short_chg).sum();
        let long_pos: f64 = activity.iter().map(|a| a.long_pos).sum();
        let short_pos: f64 = activity.iter().map(|a| a.short_pos).sum();
        let share = |pos: f64, total: f64| if total > 0.0 { pos / total } else { 0.0 };

        if long_chg > 0.0 && short_chg <= 0.0 {
            let ratio = share(long_pos, contract.totals.total_long);
            StrategySignal::bearish(
                ratio,
                format!("retail longs +{long_chg:.0} lots, {:.2}% of long OI", ratio * 100.0),
            )
        } else if short_chg > 0.0 && long_chg <= 0.0 {
            let ratio = share(short_pos, contract.totals.total_short);
            StrategySignal::bullish(
                ratio,
                format!("retail shorts +{short_chg:.0} lots, {:.2}% of short OI", ratio * 100.0),
            )
        } else {
            StrategySignal::neutral("retail changes are mixed")
        }
    }
}

/// The three strategies with settings from `config`.
pub fn default_strategies(config: &AnalysisConfig) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(PowerChange),
        Box::new(SpiderWeb::new(config.informed_fraction)),
        Box::new(RetailReverse::new(config.retail_seats.clone())),
    ]
}

/// Every strategy's signal for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAnalysis {
    /// Display key, e.g. `大商所_m2409`.
    pub key: String,
    pub exchange: Exchange,
    pub contract: String,
    pub seats: usize,
    pub totals: crate::normalize::PositionTotals,
    pub signals: BTreeMap<StrategyId, StrategySignal>,
}

impl ContractAnalysis {
    pub fn signal(&self, strategy: StrategyId) -> Option<&StrategySignal> {
        self.signals.get(&strategy)
    }
}

/// Run every strategy over one contract.
pub fn analyze_contract(
    contract: &ContractPositions,
    strategies: &[Box<dyn Strategy>],
) -> ContractAnalysis {
    ContractAnalysis {
        key: contract.key(),
        exchange: contract.exchange,
        contract: contract.contract.clone(),
        seats: contract.seats.len(),
        totals: contract.totals,
        signals: strategies
            .iter()
            .map(|s| (s.id(), s.analyze(contract)))
            .collect(),
    }
}
