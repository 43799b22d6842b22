//! Core domain types and logic.

pub mod ohlcv;
pub mod daily_metrics;
pub mod session;
pub mod universe;
pub mod opening_range;
pub mod ranking;
pub mod position;
pub mod sizing;
pub mod signal;
pub mod kill_switch;
pub mod execution;
pub mod strategy;
pub mod portfolio;
pub mod backtest;
pub mod sweep;
pub mod metrics;
pub mod config_validation;
pub mod error;
