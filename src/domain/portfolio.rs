//! Account equity across backtest days.
//!
//! With compounding, each day sizes off the equity carried from the previous
//! day, and equity resets to the initial capital at every configured period
//! boundary. Without compounding, every day sizes off the initial capital
//! while the curve still accumulates P&L.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetPeriod {
    Never,
    Month,
    Quarter,
    Year,
}

impl ResetPeriod {
    /// Identifier of the period containing `date`; equal ids mean the same period.
    fn period_of(self, date: NaiveDate) -> Option<(i32, u32)> {
        match self {
            ResetPeriod::Never => None,
            ResetPeriod::Month => Some((date.year(), date.month())),
            ResetPeriod::Quarter => Some((date.year(), (date.month() - 1) / 3)),
            ResetPeriod::Year => Some((date.year(), 0)),
        }
    }
}

impl FromStr for ResetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "never" | "none" => Ok(ResetPeriod::Never),
            "month" | "monthly" => Ok(ResetPeriod::Month),
            "quarter" | "quarterly" => Ok(ResetPeriod::Quarter),
            "year" | "yearly" | "annual" => Ok(ResetPeriod::Year),
            other => Err(format!(
                "unknown reset period '{other}', expected never, month, quarter or year"
            )),
        }
    }
}

impl std::fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetPeriod::Never => f.write_str("never"),
            ResetPeriod::Month => f.write_str("month"),
            ResetPeriod::Quarter => f.write_str("quarter"),
            ResetPeriod::Year => f.write_str("year"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    /// Account equity at the close of the day.
    pub equity: f64,
    pub day_pnl: f64,
    /// P&L since the start of the run, unaffected by resets.
    pub cumulative_pnl: f64,
    pub trades: usize,
    /// True when equity was reset to the initial capital before this day.
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityLedger {
    initial_capital: f64,
    compounding: bool,
    reset_period: ResetPeriod,
    equity: f64,
    cumulative_pnl: f64,
    period: Option<(i32, u32)>,
    pending_reset: bool,
    curve: Vec<EquityPoint>,
}

impl EquityLedger {
    pub fn new(initial_capital: f64, compounding: bool, reset_period: ResetPeriod) -> Self {
        EquityLedger {
            initial_capital,
            compounding,
            reset_period,
            equity: initial_capital,
            cumulative_pnl: 0.0,
            period: None,
            pending_reset: false,
            curve: Vec::new(),
        }
    }

    /// Start a trading day and return the equity used for sizing.
    pub fn begin_day(&mut self, date: NaiveDate) -> f64 {
        let period = self.reset_period.period_of(date);
        self.pending_reset = false;
        if self.compounding && self.period.is_some() && period != self.period {
            self.equity = self.initial_capital;
            self.pending_reset = true;
        }
        self.period = period;

        if self.compounding {
            self.equity
        } else {
            self.initial_capital
        }
    }

    pub fn end_day(&mut self, date: NaiveDate, day_pnl: f64, trades: usize) {
        self.equity += day_pnl;
        self.cumulative_pnl += day_pnl;
        self.curve.push(EquityPoint {
            date,
            equity: self.equity,
            day_pnl,
            cumulative_pnl: self.cumulative_pnl,
            trades,
            reset: self.pending_reset,
        });
        self.pending_reset = false;
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn curve(&self) -> &[EquityPoint] {
        &self.curve
    }

    pub fn into_curve(self) -> Vec<EquityPoint> {
        self.curve
    }
}
