#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use orbtrader::domain::daily_metrics::DailyMetrics;
use orbtrader::domain::error::OrbError;
pub use orbtrader::domain::ohlcv::IntradayBar;
use orbtrader::ports::data_port::MarketDataPort;
use std::collections::BTreeMap;

pub struct MockDataPort {
    pub metrics: BTreeMap<NaiveDate, Vec<DailyMetrics>>,
    pub bars: BTreeMap<(String, NaiveDate), Vec<IntradayBar>>,
    pub errors: BTreeMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            metrics: BTreeMap::new(),
            bars: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: DailyMetrics) -> Self {
        self.metrics
            .entry(metrics.trade_date)
            .or_default()
            .push(metrics);
        self
    }

    pub fn with_bars(mut self, bars: Vec<IntradayBar>) -> Self {
        if let Some(first) = bars.first() {
            self.bars
                .insert((first.symbol.clone(), first.date()), bars);
        }
        self
    }

    /// Make every bar request for `symbol` fail.
    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn symbols(&self, date: NaiveDate) -> Vec<String> {
        self.metrics
            .get(&date)
            .map(|m| m.iter().map(|r| r.symbol.clone()).collect())
            .unwrap_or_default()
    }
}

impl MarketDataPort for MockDataPort {
    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, OrbError> {
        Ok(self.metrics.range(start..=end).map(|(d, _)| *d).collect())
    }

    fn daily_metrics(&self, date: NaiveDate) -> Result<Vec<DailyMetrics>, OrbError> {
        self.metrics.get(&date).cloned().ok_or_else(|| OrbError::NoData {
            what: format!("metrics for {date}"),
        })
    }

    fn intraday_bars(&self, symbol: &str, date: NaiveDate) -> Result<Vec<IntradayBar>, OrbError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(OrbError::Database {
                reason: reason.clone(),
            });
        }
        self.bars
            .get(&(symbol.to_string(), date))
            .cloned()
            .ok_or_else(|| OrbError::NoData {
                what: format!("bars for {symbol} on {date}"),
            })
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn at(d: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    d.and_hms_opt(h, m, 0).unwrap()
}

/// Metrics that pass the default universe filter.
pub fn make_metrics(symbol: &str, d: NaiveDate, close: f64, atr: f64) -> DailyMetrics {
    DailyMetrics {
        symbol: symbol.to_string(),
        trade_date: d,
        close: Some(close),
        atr_14: Some(atr),
        avg_volume_14: Some(2_000_000.0),
        prev_close: Some(close),
        avg_or_volume_14: None,
        score: None,
    }
}

/// Minute bars for one symbol and day, keyed by bar start.
pub struct DayBars {
    symbol: String,
    date: NaiveDate,
    bars: BTreeMap<NaiveDateTime, IntradayBar>,
}

impl DayBars {
    pub fn new(symbol: &str, d: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            date: d,
            bars: BTreeMap::new(),
        }
    }

    pub fn bar(mut self, h: u32, m: u32, open: f64, high: f64, low: f64, close: f64) -> Self {
        let timestamp = at(self.date, h, m);
        self.bars.insert(
            timestamp,
            IntradayBar {
                symbol: self.symbol.clone(),
                timestamp,
                open,
                high,
                low,
                close,
                volume: 1_000,
            },
        );
        self
    }

    /// The five bars of the default 09:30-09:35 window. Every bar spans the
    /// full range; the first opens at `open` and the last closes at `close`.
    pub fn opening_range(mut self, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        let per_bar = volume / 5;
        for i in 0..5u32 {
            let bar_open = if i == 0 { open } else { close };
            self = self.bar(9, 30 + i, bar_open, high, low, close);
            if let Some(b) = self.bars.get_mut(&at(self.date, 9, 30 + i)) {
                b.volume = per_bar;
            }
        }
        self
    }

    /// Flat bars at `price` for every minute in `[from, to]` not already set.
    pub fn flat(mut self, from: (u32, u32), to: (u32, u32), price: f64) -> Self {
        let mut t = at(self.date, from.0, from.1);
        let end = at(self.date, to.0, to.1);
        while t <= end {
            if !self.bars.contains_key(&t) {
                self.bars.insert(
                    t,
                    IntradayBar {
                        symbol: self.symbol.clone(),
                        timestamp: t,
                        open: price,
                        high: price,
                        low: price,
                        close: price,
                        volume: 1_000,
                    },
                );
            }
            t += chrono::Duration::minutes(1);
        }
        self
    }

    pub fn build(self) -> Vec<IntradayBar> {
        self.bars.into_values().collect()
    }
}

/// Long breakout at 10.00 that never comes near its stop and drifts to
/// 10.20 into the forced-exit deadline.
pub fn stop_free_long(symbol: &str, d: NaiveDate) -> Vec<IntradayBar> {
    DayBars::new(symbol, d)
        .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
        .bar(9, 35, 9.95, 10.05, 9.95, 10.02)
        .bar(15, 54, 10.10, 10.25, 10.10, 10.20)
        .flat((9, 36), (15, 59), 10.10)
        .build()
}
