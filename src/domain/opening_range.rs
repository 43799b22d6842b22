//! Opening-range extraction.
//!
//! The opening range is the aggregate of every bar that starts inside
//! `[open, open + W)`. Extraction is a pure function of its inputs, so a live
//! retry that recomputes it after the window has closed gets the same answer.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::ohlcv::IntradayBar;
use super::position::Side;
use super::session::SessionCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Doji,
}

impl Direction {
    pub fn from_prices(open: f64, close: f64) -> Self {
        if close > open {
            Direction::Bullish
        } else if close < open {
            Direction::Bearish
        } else {
            Direction::Doji
        }
    }

    /// Breakout side implied by the direction; none for a doji.
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Bullish => Some(Side::Long),
            Direction::Bearish => Some(Side::Short),
            Direction::Doji => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningRange {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub direction: Direction,
    pub bar_count: usize,
}

impl OpeningRange {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpeningRangeError {
    #[error("{symbol}: no bars inside the opening window")]
    NoBars { symbol: String },

    #[error("{symbol}: bars out of order at {at}")]
    OutOfOrder { symbol: String, at: NaiveDateTime },

    #[error("expected bars for {expected}, found {found}")]
    MixedSymbols { expected: String, found: String },

    #[error("{symbol}: invalid bar at {at}")]
    InvalidBar { symbol: String, at: NaiveDateTime },
}

pub fn extract_opening_range(
    symbol: &str,
    trade_date: NaiveDate,
    bars: &[IntradayBar],
    calendar: &SessionCalendar,
) -> Result<OpeningRange, OpeningRangeError> {
    let mut previous: Option<NaiveDateTime> = None;
    for bar in bars {
        if bar.symbol != symbol {
            return Err(OpeningRangeError::MixedSymbols {
                expected: symbol.to_string(),
                found: bar.symbol.clone(),
            });
        }
        if previous.is_some_and(|p| bar.timestamp <= p) {
            return Err(OpeningRangeError::OutOfOrder {
                symbol: symbol.to_string(),
                at: bar.timestamp,
            });
        }
        previous = Some(bar.timestamp);
    }

    let window: Vec<&IntradayBar> = bars
        .iter()
        .filter(|b| b.date() == trade_date && calendar.in_opening_window(b.time()))
        .collect();

    if let Some(bad) = window.iter().find(|b| !b.is_valid()) {
        return Err(OpeningRangeError::InvalidBar {
            symbol: symbol.to_string(),
            at: bad.timestamp,
        });
    }

    let (first, last) = match (window.first(), window.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return Err(OpeningRangeError::NoBars {
                symbol: symbol.to_string(),
            });
        }
    };

    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let volume = window.iter().map(|b| b.volume).sum();

    Ok(OpeningRange {
        symbol: symbol.to_string(),
        trade_date,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        direction: Direction::from_prices(first.open, last.close),
        bar_count: window.len(),
    })
}
