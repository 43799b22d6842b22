//! orbtrader: opening-range breakout trading. Backtests and a paper-trading
//! session driver sharing one decision pipeline.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the intraday order lifecycle in
//! [`live`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod live;
pub mod cli;
