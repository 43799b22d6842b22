//! Summary statistics for a backtest run.
//!
//! Return and drawdown figures are computed on initial capital plus
//! cumulative P&L, so compounding resets do not show up as losses.

use serde::{Deserialize, Serialize};

use super::portfolio::EquityPoint;
use super::position::{ExitReason, TradeRecord};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_pnl: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: i64,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub stopped: usize,
    pub target_hits: usize,
    pub forced_exits: usize,
    pub capped_trades: usize,
    pub total_commission: f64,
}

impl Metrics {
    pub fn compute(initial_capital: f64, trades: &[TradeRecord], curve: &[EquityPoint]) -> Self {
        let account: Vec<f64> = curve
            .iter()
            .map(|p| initial_capital + p.cumulative_pnl)
            .collect();

        let total_pnl = curve.last().map_or(0.0, |p| p.cumulative_pnl);
        let total_return = if initial_capital > 0.0 {
            total_pnl / initial_capital
        } else {
            0.0
        };

        let mut series = Vec::with_capacity(account.len() + 1);
        series.push(initial_capital);
        series.extend_from_slice(&account);
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(&series);
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&series);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let count_reason =
            |reason: ExitReason| trades.iter().filter(|t| t.exit_reason == reason).count();

        Metrics {
            total_pnl,
            total_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            total_trades,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win: if trades_won > 0 {
                total_wins / trades_won as f64
            } else {
                0.0
            },
            avg_loss: if trades_lost > 0 {
                total_losses / trades_lost as f64
            } else {
                0.0
            },
            largest_win,
            largest_loss,
            stopped: count_reason(ExitReason::Stop),
            target_hits: count_reason(ExitReason::Target),
            forced_exits: count_reason(ExitReason::ForcedExit),
            capped_trades: trades.iter().filter(|t| t.is_capped).count(),
            total_commission: trades.iter().map(|t| t.commission).sum(),
        }
    }
}

fn compute_drawdown(series: &[f64]) -> (f64, i64) {
    let Some(&first) = series.first() else {
        return (0.0, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for &value in series {
        if value >= peak {
            peak = value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(series: &[f64]) -> (f64, f64) {
    if series.len() < 3 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = series
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let sharpe = if stddev > 0.0 {
        mean / stddev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside.sqrt();
    let sortino = if downside_stddev > 0.0 {
        mean / downside_stddev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}
