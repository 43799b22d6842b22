//! Append-only record store port.

use chrono::NaiveDate;

use crate::domain::backtest::BacktestRun;
use crate::domain::error::OrbError;
use crate::domain::position::TradeRecord;
use crate::domain::signal::SignalRecord;

pub trait RecordStore: Send + Sync {
    /// Appends one signal snapshot. Earlier snapshots are never rewritten.
    fn append_signal(&self, record: &SignalRecord) -> Result<(), OrbError>;

    fn append_trade(&self, trade: &TradeRecord) -> Result<(), OrbError>;

    /// Stores a finished run and returns its id.
    fn append_run(&self, run: &BacktestRun) -> Result<i64, OrbError>;

    /// Snapshots for `date` in append order.
    fn signals_for(&self, date: NaiveDate) -> Result<Vec<SignalRecord>, OrbError>;

    fn trades_for(&self, date: NaiveDate) -> Result<Vec<TradeRecord>, OrbError>;
}
