//! Fixed-fractional position sizing with liquidity and leverage caps.
//!
//! shares = min(floor(E * r / |entry - stop|), floor(c * avg_volume_14),
//! floor(leverage * E / entry)). A result below one share is an error; it is
//! never rounded up.

use serde::{Deserialize, Serialize};

/// Relative slack for the division check, a few ULPs. Recovers shares lost
/// to float noise such as 0.3 / 0.1 = 2.9999999999999996 without rounding
/// a genuinely fractional ratio up.
const ULP_SLACK: f64 = 4.0 * f64::EPSILON;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub risk_pct: f64,
    /// Fraction of the 14-day average volume; `None` disables the cap.
    pub liquidity_cap_pct: Option<f64>,
    pub leverage: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            risk_pct: 0.01,
            liquidity_cap_pct: Some(0.01),
            leverage: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeBinding {
    Risk,
    Liquidity,
    Leverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub shares: i64,
    pub risk_amount: f64,
    /// True when the liquidity cap, not the risk budget, set the size.
    pub is_capped: bool,
    pub binding: SizeBinding,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    #[error("INSUFFICIENT_SIZE: risk {risk_shares}, liquidity {liquidity_shares:?}, leverage {leverage_shares}")]
    InsufficientSize {
        risk_shares: i64,
        liquidity_shares: Option<i64>,
        leverage_shares: i64,
    },

    #[error("entry and stop are equal")]
    ZeroStopDistance,

    #[error("equity must be positive, got {0}")]
    NonPositiveEquity(f64),

    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(f64),
}

/// floor(numerator / denominator), taking the next integer only when it fits
/// within `ULP_SLACK` of the numerator.
fn floor_shares(numerator: f64, denominator: f64) -> i64 {
    let ratio = numerator / denominator;
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0;
    }
    let floor = ratio.floor();
    let next = floor + 1.0;
    if next * denominator <= numerator * (1.0 + ULP_SLACK) {
        next as i64
    } else {
        floor as i64
    }
}

pub fn size_position(
    equity: f64,
    entry: f64,
    stop: f64,
    avg_volume_14: f64,
    risk: &RiskConfig,
) -> Result<PositionSize, SizingError> {
    if !(equity.is_finite() && equity > 0.0) {
        return Err(SizingError::NonPositiveEquity(equity));
    }
    if !(entry.is_finite() && entry > 0.0) {
        return Err(SizingError::NonPositiveEntry(entry));
    }
    let distance = (entry - stop).abs();
    if !(distance.is_finite() && distance > 0.0) {
        return Err(SizingError::ZeroStopDistance);
    }

    let risk_amount = equity * risk.risk_pct;
    let risk_shares = floor_shares(risk_amount, distance);
    let liquidity_shares = risk
        .liquidity_cap_pct
        .map(|pct| floor_shares(pct * avg_volume_14, 1.0));
    let leverage_shares = floor_shares(risk.leverage * equity, entry);

    let mut shares = risk_shares;
    let mut binding = SizeBinding::Risk;
    if leverage_shares < shares {
        shares = leverage_shares;
        binding = SizeBinding::Leverage;
    }
    if let Some(liquidity) = liquidity_shares {
        if liquidity < shares {
            shares = liquidity;
            binding = SizeBinding::Liquidity;
        }
    }

    if shares < 1 {
        return Err(SizingError::InsufficientSize {
            risk_shares,
            liquidity_shares,
            leverage_shares,
        });
    }

    Ok(PositionSize {
        shares,
        risk_amount,
        is_capped: binding == SizeBinding::Liquidity,
        binding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_cap_binds() {
        let risk = RiskConfig {
            risk_pct: 0.02,
            liquidity_cap_pct: Some(0.01),
            leverage: 4.0,
        };
        let size = size_position(1000.0, 30.0, 29.0, 500.0, &risk).unwrap();
        assert_eq!(size.shares, 5);
        assert!(size.is_capped);
        assert_eq!(size.binding, SizeBinding::Liquidity);
        assert!((size.risk_amount - 20.0).abs() < 1e-12);
    }

    #[test]
    fn risk_budget_binds() {
        let risk = RiskConfig {
            risk_pct: 0.02,
            liquidity_cap_pct: Some(0.01),
            leverage: 4.0,
        };
        let size = size_position(1000.0, 30.0, 29.0, 1_000_000.0, &risk).unwrap();
        assert_eq!(size.shares, 20);
        assert!(!size.is_capped);
        assert_eq!(size.binding, SizeBinding::Risk);
    }

    #[test]
    fn leverage_binds() {
        let risk = RiskConfig {
            risk_pct: 0.5,
            liquidity_cap_pct: None,
            leverage: 1.0,
        };
        let size = size_position(1000.0, 100.0, 99.0, 0.0, &risk).unwrap();
        assert_eq!(size.shares, 10);
        assert_eq!(size.binding, SizeBinding::Leverage);
        assert!(!size.is_capped);
    }

    #[test]
    fn below_one_share_is_rejected_not_rounded() {
        let risk = RiskConfig::default();
        let err = size_position(100.0, 50.0, 45.0, 1_000_000.0, &risk).unwrap_err();
        assert!(matches!(err, SizingError::InsufficientSize { risk_shares: 0, .. }));
        assert!(err.to_string().starts_with("INSUFFICIENT_SIZE"));
    }

    #[test]
    fn float_noise_does_not_lose_a_share() {
        let risk = RiskConfig {
            risk_pct: 0.3,
            liquidity_cap_pct: None,
            leverage: 100.0,
        };
        let size = size_position(1.0, 10.0, 9.9, 0.0, &risk).unwrap();
        assert_eq!(size.shares, 3);
    }

    #[test]
    fn ratio_just_below_an_integer_is_not_rounded_up() {
        let risk = RiskConfig {
            risk_pct: 0.01,
            liquidity_cap_pct: None,
            leverage: 100.0,
        };
        let stop = 100.0 - 10.0 / 2.9999999995;
        let size = size_position(1000.0, 100.0, stop, 0.0, &risk).unwrap();
        assert_eq!(size.shares, 2);
        assert!(size.shares as f64 * (100.0 - stop) <= size.risk_amount);
    }

    #[test]
    fn degenerate_inputs() {
        let risk = RiskConfig::default();
        assert_eq!(
            size_position(1000.0, 10.0, 10.0, 1e6, &risk),
            Err(SizingError::ZeroStopDistance)
        );
        assert!(matches!(
            size_position(0.0, 10.0, 9.0, 1e6, &risk),
            Err(SizingError::NonPositiveEquity(_))
        ));
        assert!(matches!(
            size_position(1000.0, -1.0, 9.0, 1e6, &risk),
            Err(SizingError::NonPositiveEntry(_))
        ));
    }

    #[test]
    fn short_side_uses_absolute_distance() {
        let risk = RiskConfig {
            risk_pct: 0.02,
            liquidity_cap_pct: None,
            leverage: 4.0,
        };
        let size = size_position(1000.0, 29.0, 30.0, 0.0, &risk).unwrap();
        assert_eq!(size.shares, 20);
    }
}
