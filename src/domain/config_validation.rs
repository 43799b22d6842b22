//! Configuration validation.
//!
//! Reads every recognised key, checks ranges and orderings, and builds the
//! typed parameter structs. Absent keys fall back to defaults; present but
//! malformed keys are errors naming their section and key.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::OrbError;
use crate::domain::execution::ExecutionCosts;
use crate::domain::portfolio::ResetPeriod;
use crate::domain::ranking::{RankingConfig, SideFilter};
use crate::domain::session::SessionCalendar;
use crate::domain::sizing::RiskConfig;
use crate::domain::strategy::StrategyParams;
use crate::domain::universe::{parse_symbols, UniverseFilter};
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveTime};
use std::str::FromStr;

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), OrbError> {
    build_strategy_params(config).map(|_| ())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), OrbError> {
    build_strategy_params(config)?;
    build_backtest_config(config)?;
    Ok(())
}

pub fn build_strategy_params(config: &dyn ConfigPort) -> Result<StrategyParams, OrbError> {
    let defaults = StrategyParams::default();
    let universe = build_universe(config, &defaults.universe)?;
    let ranking = build_ranking(config, &defaults.ranking)?;
    let calendar = build_calendar(config, &defaults.calendar)?;
    let risk = build_risk(config, &defaults.risk)?;

    let stop_atr_scale = read_or(config, "signal", "stop_atr_scale", defaults.stop_atr_scale)?;
    if stop_atr_scale <= 0.0 {
        return Err(OrbError::config_invalid(
            "signal",
            "stop_atr_scale",
            "stop_atr_scale must be positive",
        ));
    }
    let target_atr_scale = read_opt::<f64>(config, "signal", "target_atr_scale")?;
    if matches!(target_atr_scale, Some(t) if t <= 0.0) {
        return Err(OrbError::config_invalid(
            "signal",
            "target_atr_scale",
            "target_atr_scale must be positive when set",
        ));
    }

    Ok(StrategyParams {
        universe,
        ranking,
        calendar,
        stop_atr_scale,
        target_atr_scale,
        risk,
    })
}

fn build_universe(config: &dyn ConfigPort, defaults: &UniverseFilter) -> Result<UniverseFilter, OrbError> {
    let min_price = read_or(config, "universe", "min_price", defaults.min_price)?;
    let min_atr = read_or(config, "universe", "min_atr", defaults.min_atr)?;
    let min_volume = read_or(config, "universe", "min_volume", defaults.min_volume)?;
    for (key, value) in [("min_price", min_price), ("min_atr", min_atr), ("min_volume", min_volume)] {
        if value < 0.0 {
            return Err(OrbError::config_invalid(
                "universe",
                key,
                format!("{key} must be non-negative"),
            ));
        }
    }

    let symbols = match non_empty(config, "universe", "symbols") {
        Some(list) => parse_symbols(&list)
            .map_err(|e| OrbError::config_invalid("universe", "symbols", e.to_string()))?,
        None => Vec::new(),
    };

    Ok(UniverseFilter {
        min_price,
        min_atr,
        min_volume,
        symbols,
    })
}

fn build_ranking(config: &dyn ConfigPort, defaults: &RankingConfig) -> Result<RankingConfig, OrbError> {
    let rvol_min = read_or(config, "ranking", "rvol_min", defaults.rvol_min)?;
    if rvol_min < 0.0 {
        return Err(OrbError::config_invalid(
            "ranking",
            "rvol_min",
            "rvol_min must be non-negative",
        ));
    }
    let top_n = read_or(config, "ranking", "top_n", defaults.top_n)?;
    if top_n == 0 {
        return Err(OrbError::config_invalid(
            "ranking",
            "top_n",
            "top_n must be at least 1",
        ));
    }
    let side = read_or::<SideFilter>(config, "ranking", "side", defaults.side)?;
    let min_score = read_opt::<f64>(config, "ranking", "min_score")?;

    Ok(RankingConfig {
        rvol_min,
        top_n,
        side,
        min_score,
    })
}

fn build_calendar(config: &dyn ConfigPort, defaults: &SessionCalendar) -> Result<SessionCalendar, OrbError> {
    let calendar = SessionCalendar {
        open: read_time(config, "session", "open", defaults.open)?,
        close: read_time(config, "session", "close", defaults.close)?,
        or_window_minutes: read_or(config, "session", "or_window_minutes", defaults.or_window_minutes)?,
        entry_cutoff: read_time(config, "session", "entry_cutoff_time", defaults.entry_cutoff)?,
        forced_exit: read_time(config, "session", "forced_exit_time", defaults.forced_exit)?,
        utc_offset_minutes: read_or(config, "session", "utc_offset_minutes", defaults.utc_offset_minutes)?,
    };
    if calendar.utc_offset_minutes.abs() > 14 * 60 {
        return Err(OrbError::config_invalid(
            "session",
            "utc_offset_minutes",
            "utc_offset_minutes must be within +/-840",
        ));
    }
    calendar.validate().map_err(|reason| {
        let key = if reason.starts_with("or_window_minutes") {
            "or_window_minutes"
        } else {
            "entry_cutoff_time"
        };
        OrbError::config_invalid("session", key, reason)
    })?;
    Ok(calendar)
}

fn build_risk(config: &dyn ConfigPort, defaults: &RiskConfig) -> Result<RiskConfig, OrbError> {
    let risk_pct = read_or(config, "risk", "risk_pct", defaults.risk_pct)?;
    if risk_pct <= 0.0 || risk_pct > 1.0 {
        return Err(OrbError::config_invalid(
            "risk",
            "risk_pct",
            "risk_pct must be in (0, 1]",
        ));
    }

    let liquidity_cap_pct = match non_empty(config, "risk", "liquidity_cap_pct") {
        None => defaults.liquidity_cap_pct,
        Some(v) if v.eq_ignore_ascii_case("none") => None,
        Some(v) => {
            let pct = v.parse::<f64>().map_err(|e| {
                OrbError::config_invalid("risk", "liquidity_cap_pct", e.to_string())
            })?;
            if pct <= 0.0 || pct > 1.0 {
                return Err(OrbError::config_invalid(
                    "risk",
                    "liquidity_cap_pct",
                    "liquidity_cap_pct must be in (0, 1] or none",
                ));
            }
            Some(pct)
        }
    };

    let leverage = read_or(config, "risk", "leverage", defaults.leverage)?;
    if leverage <= 0.0 {
        return Err(OrbError::config_invalid(
            "risk",
            "leverage",
            "leverage must be positive",
        ));
    }

    Ok(RiskConfig {
        risk_pct,
        liquidity_cap_pct,
        leverage,
    })
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, OrbError> {
    let initial_capital = read_or(config, "backtest", "initial_capital", 0.0)?;
    if initial_capital <= 0.0 {
        return Err(OrbError::config_invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    let start_date = parse_date(non_empty(config, "backtest", "start_date").as_deref(), "start_date")?;
    let end_date = parse_date(non_empty(config, "backtest", "end_date").as_deref(), "end_date")?;
    if start_date > end_date {
        return Err(OrbError::config_invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }

    let compounding = read_bool(config, "backtest", "compounding", false)?;
    let reset_period = read_or(config, "backtest", "compounding_reset_period", ResetPeriod::Never)?;

    Ok(BacktestConfig {
        start_date,
        end_date,
        initial_capital,
        compounding,
        reset_period,
        costs: build_costs(config)?,
    })
}

/// Commission and slippage from `[backtest]`; paper sessions use the same model.
pub fn build_costs(config: &dyn ConfigPort) -> Result<ExecutionCosts, OrbError> {
    let mut values = [0.0; 4];
    let keys = [
        "commission_per_trade",
        "commission_per_share",
        "commission_pct",
        "slippage_pct",
    ];
    for (slot, key) in values.iter_mut().zip(keys) {
        *slot = read_or(config, "backtest", key, 0.0)?;
        if *slot < 0.0 {
            return Err(OrbError::config_invalid(
                "backtest",
                key,
                format!("{key} must be non-negative"),
            ));
        }
    }
    let [commission_per_trade, commission_per_share, commission_pct, slippage_pct] = values;
    Ok(ExecutionCosts {
        commission_per_trade,
        commission_per_share,
        commission_pct,
        slippage_pct,
    })
}

fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, OrbError> {
    match value {
        None => Err(OrbError::config_missing("backtest", field)),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            OrbError::config_invalid(
                "backtest",
                field,
                format!("invalid {field} format, expected YYYY-MM-DD"),
            )
        }),
    }
}

/// Trimmed value of a key, or `None` when absent or blank.
pub fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn read_opt<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, OrbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty(config, section, key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| OrbError::config_invalid(section, key, format!("'{v}': {e}")))
        })
        .transpose()
}

pub fn read_or<T>(config: &dyn ConfigPort, section: &str, key: &str, default: T) -> Result<T, OrbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(read_opt(config, section, key)?.unwrap_or(default))
}

pub fn read_bool(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, OrbError> {
    match non_empty(config, section, key) {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(OrbError::config_invalid(
                section,
                key,
                format!("'{v}' is not a boolean"),
            )),
        },
    }
}

/// `HH:MM` or `HH:MM:SS`.
pub fn read_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, OrbError> {
    match non_empty(config, section, key) {
        None => Ok(default),
        Some(v) => NaiveTime::parse_from_str(&v, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&v, "%H:%M:%S"))
            .map_err(|_| {
                OrbError::config_invalid(section, key, format!("'{v}' is not a time, expected HH:MM"))
            }),
    }
}
