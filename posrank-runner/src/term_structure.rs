//! Term-structure classification from daily closes.
//!
//! For each variety the listed delivery months are ordered by symbol and the
//! closes compared along the curve.

use posrank_core::domain::DailyPrice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurveShape {
    /// Strictly falling closes: near months above far months.
    Backwardation,
    /// Strictly rising closes: far months above near months.
    Contango,
    Flat,
}

impl fmt::Display for CurveShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveShape::Backwardation => f.write_str("backwardation"),
            CurveShape::Contango => f.write_str("contango"),
            CurveShape::Flat => f.write_str("flat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub symbol: String,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStructure {
    pub variety: String,
    pub shape: CurveShape,
    pub points: Vec<CurvePoint>,
}

impl TermStructure {
    /// Percent change between consecutive contracts, None where the earlier close is zero.
    pub fn spreads(&self) -> Vec<Option<f64>> {
        self.points
            .windows(2)
            .map(|w| {
                if w[0].close == 0.0 {
                    None
                } else {
                    Some((w[1].close - w[0].close) / w[0].close * 100.0)
                }
            })
            .collect()
    }
}

/// Classify the curve of every variety with at least two priced contracts.
///
/// Varieties come out in name order. Rows with a missing or non-positive
/// close are ignored.
pub fn analyze_term_structure(prices: &[DailyPrice]) -> Vec<TermStructure> {
    let mut by_variety: BTreeMap<&str, Vec<CurvePoint>> = BTreeMap::new();
    for price in prices {
        if let Some(close) = price.close.filter(|c| *c > 0.0) {
            by_variety
                .entry(price.variety.as_str())
                .or_default()
                .push(CurvePoint {
                    symbol: price.symbol.clone(),
                    close,
                });
        }
    }

    by_variety
        .into_iter()
        .filter_map(|(variety, mut points)| {
            if points.len() < 2 {
                return None;
            }
            points.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            Some(TermStructure {
                variety: variety.to_string(),
                shape: classify(&points),
                points,
            })
        })
        .collect()
}

fn classify(points: &[CurvePoint]) -> CurveShape {
    if points.windows(2).all(|w| w[0].close > w[1].close) {
        CurveShape::Backwardation
    } else if points.windows(2).all(|w| w[0].close < w[1].close) {
        CurveShape::Contango
    } else {
        CurveShape::Flat
    }
}
