//! Fill and exit trigger math shared by the backtest engine and the paper
//! gateway, plus the commission and slippage cost model.
//!
//! Entry orders are stop orders at the opening-range boundary. A bar fills
//! the entry when its range reaches the stop; if the bar opens beyond the
//! stop the fill happens at the open instead. Exits follow the same gap rule,
//! and a bar that touches both stop and target is treated as a stop.

use serde::{Deserialize, Serialize};

use super::ohlcv::IntradayBar;
use super::position::{ExitReason, Position, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCosts {
    pub commission_per_trade: f64,
    pub commission_per_share: f64,
    /// Percent of traded notional, e.g. 0.1 means 0.1%.
    pub commission_pct: f64,
    /// Percent adverse price move applied to every fill.
    pub slippage_pct: f64,
}

impl Default for ExecutionCosts {
    fn default() -> Self {
        ExecutionCosts {
            commission_per_trade: 0.0,
            commission_per_share: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
        }
    }
}

/// Commission for one leg: flat fee + per-share fee + percent of notional.
pub fn calculate_commission(quantity: i64, price: f64, costs: &ExecutionCosts) -> f64 {
    let shares = quantity.unsigned_abs() as f64;
    costs.commission_per_trade
        + shares * costs.commission_per_share
        + shares * price * costs.commission_pct / 100.0
}

/// Entry slippage: longs buy higher, shorts sell lower.
pub fn apply_entry_slippage(side: Side, price: f64, slippage_pct: f64) -> f64 {
    price * (1.0 + side.sign() * slippage_pct / 100.0)
}

/// Exit slippage: longs sell lower, shorts cover higher.
pub fn apply_exit_slippage(side: Side, price: f64, slippage_pct: f64) -> f64 {
    price * (1.0 - side.sign() * slippage_pct / 100.0)
}

/// Price at which a stop-entry at `entry` fills on `bar`, before slippage.
pub fn entry_trigger(side: Side, entry: f64, bar: &IntradayBar) -> Option<f64> {
    match side {
        Side::Long if bar.high >= entry => Some(entry.max(bar.open)),
        Side::Short if bar.low <= entry => Some(entry.min(bar.open)),
        _ => None,
    }
}

/// Stop or target hit within a bar, with the gap-adjusted exit price.
pub fn exit_trigger_on_bar(position: &Position, bar: &IntradayBar) -> Option<(ExitReason, f64)> {
    let stop = position.stop_price;
    match position.side {
        Side::Long => {
            if bar.low <= stop {
                return Some((ExitReason::Stop, stop.min(bar.open)));
            }
            if let Some(target) = position.target_price {
                if bar.high >= target {
                    return Some((ExitReason::Target, target.max(bar.open)));
                }
            }
        }
        Side::Short => {
            if bar.high >= stop {
                return Some((ExitReason::Stop, stop.max(bar.open)));
            }
            if let Some(target) = position.target_price {
                if bar.low <= target {
                    return Some((ExitReason::Target, target.min(bar.open)));
                }
            }
        }
    }
    None
}

/// Stop or target check against a single observed price. Stop wins.
pub fn exit_trigger_at_price(position: &Position, price: f64) -> Option<ExitReason> {
    if position.should_stop(price) {
        Some(ExitReason::Stop)
    } else if position.should_take_profit(price) {
        Some(ExitReason::Target)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub gross_pnl: f64,
    pub commission: f64,
    pub pnl: f64,
}

/// Round-trip P&L for a position closed at `exit_price`, commissions on
/// both legs deducted.
pub fn settle(position: &Position, exit_price: f64, costs: &ExecutionCosts) -> Settlement {
    let gross_pnl = position.unrealized_pnl(exit_price);
    let commission = calculate_commission(position.quantity, position.entry_price, costs)
        + calculate_commission(position.quantity, exit_price, costs);
    Settlement {
        gross_pnl,
        commission,
        pnl: gross_pnl - commission,
    }
}
