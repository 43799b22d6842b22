//! Market data port trait.

use crate::domain::daily_metrics::DailyMetrics;
use crate::domain::error::OrbError;
use crate::domain::ohlcv::IntradayBar;
use chrono::NaiveDate;

pub trait MarketDataPort: Send + Sync {
    /// Dates with data in `[start, end]`, ascending.
    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, OrbError>;

    /// Pre-computed daily metrics for every symbol on `date`, by symbol.
    fn daily_metrics(&self, date: NaiveDate) -> Result<Vec<DailyMetrics>, OrbError>;

    /// One-minute bars for `symbol` on `date`, ascending by bar start.
    fn intraday_bars(&self, symbol: &str, date: NaiveDate) -> Result<Vec<IntradayBar>, OrbError>;
}
