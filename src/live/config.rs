//! `[live]` section: polling, retries and the kill-switch sentinel.

use chrono::Duration;
use std::path::PathBuf;

use crate::domain::config_validation::{non_empty, read_or};
use crate::domain::error::OrbError;
use crate::ports::config_port::ConfigPort;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    /// Sizing base for the session.
    pub equity: f64,
    pub poll_interval: Duration,
    pub refresh_lead: Duration,
    pub retry: RetryPolicy,
    /// The kill switch engages while this file exists.
    pub kill_switch_file: Option<PathBuf>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            equity: 100_000.0,
            poll_interval: Duration::seconds(60),
            refresh_lead: Duration::minutes(15),
            retry: RetryPolicy::default(),
            kill_switch_file: None,
        }
    }
}

fn positive<T: PartialOrd + Default + std::fmt::Display>(
    section: &str,
    key: &str,
    value: T,
) -> Result<T, OrbError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(OrbError::config_invalid(section, key, format!("{value} must be positive")))
    }
}

pub fn build_live_config(config: &dyn ConfigPort) -> Result<LiveConfig, OrbError> {
    let defaults = LiveConfig::default();
    let equity = read_or(config, "live", "initial_capital", defaults.equity)?;
    if !equity.is_finite() || equity <= 0.0 {
        return Err(OrbError::config_invalid(
            "live",
            "initial_capital",
            format!("{equity} must be a positive amount"),
        ));
    }

    let poll_secs = positive("live", "poll_interval_secs", read_or(config, "live", "poll_interval_secs", 60i64)?)?;
    let lead = read_or(config, "live", "universe_refresh_lead_minutes", 15i64)?;
    if lead < 0 {
        return Err(OrbError::config_invalid(
            "live",
            "universe_refresh_lead_minutes",
            "must not be negative",
        ));
    }

    let retry = RetryPolicy {
        max_attempts: positive("live", "retry_attempts", read_or(config, "live", "retry_attempts", 3u32)?)?,
        initial_backoff: std::time::Duration::from_millis(positive(
            "live",
            "retry_initial_backoff_ms",
            read_or(config, "live", "retry_initial_backoff_ms", 250u64)?,
        )?),
        max_backoff: std::time::Duration::from_millis(positive(
            "live",
            "retry_max_backoff_ms",
            read_or(config, "live", "retry_max_backoff_ms", 5_000u64)?,
        )?),
        timeout: std::time::Duration::from_millis(positive(
            "live",
            "request_timeout_ms",
            read_or(config, "live", "request_timeout_ms", 10_000u64)?,
        )?),
    };
    if retry.max_backoff < retry.initial_backoff {
        return Err(OrbError::config_invalid(
            "live",
            "retry_max_backoff_ms",
            "must not be below retry_initial_backoff_ms",
        ));
    }

    Ok(LiveConfig {
        equity,
        poll_interval: Duration::seconds(poll_secs),
        refresh_lead: Duration::minutes(lead),
        retry,
        kill_switch_file: non_empty(config, "live", "kill_switch_file").map(PathBuf::from),
    })
}
