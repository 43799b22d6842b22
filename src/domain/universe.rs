//! Daily universe selection.
//!
//! Filters the day's metrics down to symbols that clear the minimum price,
//! volatility and liquidity thresholds. Rows with missing metrics are skipped,
//! never defaulted.

use crate::domain::daily_metrics::{CheckedMetrics, DailyMetrics};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseFilter {
    pub min_price: f64,
    pub min_atr: f64,
    pub min_volume: f64,
    /// Optional allow-list; empty means every symbol is eligible.
    pub symbols: Vec<String>,
}

impl Default for UniverseFilter {
    fn default() -> Self {
        UniverseFilter {
            min_price: 5.0,
            min_atr: 0.5,
            min_volume: 1_000_000.0,
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    MissingMetric(String),
    NotListed,
    Duplicate,
    BelowMinPrice { price: f64 },
    BelowMinAtr { atr: f64 },
    BelowMinVolume { volume: f64 },
}

impl SkipReason {
    /// Skips caused by bad input data rather than thresholds.
    pub fn is_data_error(&self) -> bool {
        matches!(self, SkipReason::MissingMetric(_))
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingMetric(field) => write!(f, "missing or invalid {field}"),
            SkipReason::NotListed => write!(f, "not in symbol list"),
            SkipReason::Duplicate => write!(f, "duplicate metrics row"),
            SkipReason::BelowMinPrice { price } => write!(f, "price {price} below minimum"),
            SkipReason::BelowMinAtr { atr } => write!(f, "atr {atr} below minimum"),
            SkipReason::BelowMinVolume { volume } => {
                write!(f, "average volume {volume} below minimum")
            }
        }
    }
}

/// Universe members are ordered by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSelection {
    pub members: Vec<CheckedMetrics>,
    pub skipped: Vec<SkippedSymbol>,
}

impl UniverseSelection {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members.iter().any(|m| m.symbol == symbol)
    }
}

pub fn select_universe(filter: &UniverseFilter, metrics: &[DailyMetrics]) -> UniverseSelection {
    let allowed: HashSet<&str> = filter.symbols.iter().map(String::as_str).collect();
    let mut members: BTreeMap<String, CheckedMetrics> = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut skipped = Vec::new();

    for row in metrics {
        let mut skip = |reason: SkipReason| {
            skipped.push(SkippedSymbol {
                symbol: row.symbol.clone(),
                reason,
            })
        };

        if !seen.insert(row.symbol.as_str()) {
            skip(SkipReason::Duplicate);
            continue;
        }
        if !allowed.is_empty() && !allowed.contains(row.symbol.as_str()) {
            skip(SkipReason::NotListed);
            continue;
        }

        let checked = match row.check() {
            Ok(c) => c,
            Err(field) => {
                skip(SkipReason::MissingMetric(field.to_string()));
                continue;
            }
        };

        if checked.close < filter.min_price {
            skip(SkipReason::BelowMinPrice {
                price: checked.close,
            });
        } else if checked.atr_14 < filter.min_atr {
            skip(SkipReason::BelowMinAtr {
                atr: checked.atr_14,
            });
        } else if checked.avg_volume_14 < filter.min_volume {
            skip(SkipReason::BelowMinVolume {
                volume: checked.avg_volume_14,
            });
        } else {
            members.insert(checked.symbol.clone(), checked);
        }
    }

    skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    debug!(
        members = members.len(),
        skipped = skipped.len(),
        "universe selected"
    );

    UniverseSelection {
        members: members.into_values().collect(),
        skipped,
    }
}
