//! Per-symbol daily metrics produced by the external data pipeline.
//!
//! Raw rows may have gaps; [`DailyMetrics::check`] turns a row into
//! [`CheckedMetrics`] only when every required field is present and finite.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub close: Option<f64>,
    pub atr_14: Option<f64>,
    pub avg_volume_14: Option<f64>,
    pub prev_close: Option<f64>,
    /// Average volume of the opening-range window over the last 14 sessions.
    pub avg_or_volume_14: Option<f64>,
    /// Opaque ranking score from an upstream model.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedMetrics {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub close: f64,
    pub atr_14: f64,
    pub avg_volume_14: f64,
    pub prev_close: f64,
    pub avg_or_volume_14: Option<f64>,
    pub score: Option<f64>,
}

impl DailyMetrics {
    /// Validate required fields. Returns the name of the first missing or
    /// non-finite field on failure.
    pub fn check(&self) -> Result<CheckedMetrics, &'static str> {
        let close = required(self.close, "close")?;
        let atr_14 = required(self.atr_14, "atr_14")?;
        let avg_volume_14 = required(self.avg_volume_14, "avg_volume_14")?;
        let prev_close = required(self.prev_close, "prev_close")?;
        if atr_14 < 0.0 {
            return Err("atr_14");
        }
        if avg_volume_14 < 0.0 {
            return Err("avg_volume_14");
        }

        Ok(CheckedMetrics {
            symbol: self.symbol.clone(),
            trade_date: self.trade_date,
            close,
            atr_14,
            avg_volume_14,
            prev_close,
            avg_or_volume_14: self.avg_or_volume_14.filter(|v| v.is_finite()),
            score: self.score.filter(|v| v.is_finite()),
        })
    }
}

fn required(value: Option<f64>, field: &'static str) -> Result<f64, &'static str> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(field),
    }
}
