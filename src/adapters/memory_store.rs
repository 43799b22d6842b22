//! In-memory record store for paper sessions and tests.

use chrono::NaiveDate;
use std::sync::Mutex;

use crate::domain::backtest::BacktestRun;
use crate::domain::error::OrbError;
use crate::domain::position::TradeRecord;
use crate::domain::signal::SignalRecord;
use crate::ports::store_port::RecordStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    signals: Mutex<Vec<SignalRecord>>,
    trades: Mutex<Vec<TradeRecord>>,
    runs: Mutex<Vec<BacktestRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every signal snapshot appended so far, in order.
    pub fn all_signals(&self) -> Vec<SignalRecord> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn all_trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl RecordStore for MemoryStore {
    fn append_signal(&self, record: &SignalRecord) -> Result<(), OrbError> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn append_trade(&self, trade: &TradeRecord) -> Result<(), OrbError> {
        self.trades
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(trade.clone());
        Ok(())
    }

    fn append_run(&self, run: &BacktestRun) -> Result<i64, OrbError> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.push(run.clone());
        Ok(runs.len() as i64)
    }

    fn signals_for(&self, date: NaiveDate) -> Result<Vec<SignalRecord>, OrbError> {
        Ok(self
            .all_signals()
            .into_iter()
            .filter(|r| r.trade_date == date)
            .collect())
    }

    fn trades_for(&self, date: NaiveDate) -> Result<Vec<TradeRecord>, OrbError> {
        Ok(self
            .all_trades()
            .into_iter()
            .filter(|t| t.trade_date == date)
            .collect())
    }
}
