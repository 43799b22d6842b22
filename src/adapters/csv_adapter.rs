//! CSV file market data adapter.
//!
//! Layout under the base directory:
//!
//! ```text
//! metrics/2024-03-01.csv        symbol,close,atr_14,avg_volume_14,prev_close,avg_or_volume_14,score
//! bars/2024-03-01/AAPL.csv      timestamp,open,high,low,close,volume
//! ```
//!
//! Empty metric cells read as missing. Bar timestamps are bar starts in
//! exchange-local time, either `YYYY-MM-DD HH:MM[:SS]` or `HH:MM`.

use crate::domain::daily_metrics::DailyMetrics;
use crate::domain::error::OrbError;
use crate::domain::ohlcv::IntradayBar;
use crate::ports::data_port::MarketDataPort;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MetricsRow {
    symbol: String,
    close: Option<f64>,
    atr_14: Option<f64>,
    avg_volume_14: Option<f64>,
    prev_close: Option<f64>,
    #[serde(default)]
    avg_or_volume_14: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn metrics_path(&self, date: NaiveDate) -> PathBuf {
        self.base_path
            .join("metrics")
            .join(format!("{}.csv", date.format("%Y-%m-%d")))
    }

    fn bars_path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.base_path
            .join("bars")
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("{symbol}.csv"))
    }

    fn open_reader(path: &Path, what: &str) -> Result<csv::Reader<fs::File>, OrbError> {
        if !path.exists() {
            return Err(OrbError::NoData {
                what: format!("{what} ({})", path.display()),
            });
        }
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| OrbError::Data {
                reason: format!("failed to read {}: {}", path.display(), e),
            })
    }
}

fn parse_timestamp(value: &str, date: NaiveDate) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| {
            NaiveTime::parse_from_str(value, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
                .ok()
                .map(|t| date.and_time(t))
        })
}

impl MarketDataPort for CsvAdapter {
    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, OrbError> {
        let dir = self.base_path.join("metrics");
        let entries = fs::read_dir(&dir).map_err(|e| OrbError::Data {
            reason: format!("failed to read directory {}: {}", dir.display(), e),
        })?;

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OrbError::Data {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let Some(stem) = name_str.strip_suffix(".csv") else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                if date >= start && date <= end {
                    dates.push(date);
                }
            }
        }

        dates.sort();
        Ok(dates)
    }

    fn daily_metrics(&self, date: NaiveDate) -> Result<Vec<DailyMetrics>, OrbError> {
        let path = self.metrics_path(date);
        let mut rdr = Self::open_reader(&path, &format!("metrics for {date}"))?;

        let mut metrics = Vec::new();
        for result in rdr.deserialize::<MetricsRow>() {
            let row = result.map_err(|e| OrbError::Data {
                reason: format!("{}: {}", path.display(), e),
            })?;
            metrics.push(DailyMetrics {
                symbol: row.symbol.to_uppercase(),
                trade_date: date,
                close: row.close,
                atr_14: row.atr_14,
                avg_volume_14: row.avg_volume_14,
                prev_close: row.prev_close,
                avg_or_volume_14: row.avg_or_volume_14,
                score: row.score,
            });
        }

        metrics.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(metrics)
    }

    fn intraday_bars(&self, symbol: &str, date: NaiveDate) -> Result<Vec<IntradayBar>, OrbError> {
        let path = self.bars_path(symbol, date);
        let mut rdr = Self::open_reader(&path, &format!("bars for {symbol} on {date}"))?;

        let mut bars = Vec::new();
        for result in rdr.deserialize::<BarRow>() {
            let row = result.map_err(|e| OrbError::Data {
                reason: format!("{}: {}", path.display(), e),
            })?;
            let timestamp = parse_timestamp(&row.timestamp, date).ok_or_else(|| OrbError::Data {
                reason: format!("{}: invalid timestamp '{}'", path.display(), row.timestamp),
            })?;
            bars.push(IntradayBar {
                symbol: symbol.to_string(),
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        // Order is left as stored; the opening-range extractor rejects
        // out-of-order series.
        Ok(bars)
    }
}
