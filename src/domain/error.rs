//! Domain error types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Top-level error type for orbtrader.
#[derive(Debug, thiserror::Error)]
pub enum OrbError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {what}")]
    NoData { what: String },

    #[error(transparent)]
    Gateway(#[from] crate::ports::gateway_port::GatewayError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrbError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        OrbError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(section: &str, key: &str) -> Self {
        OrbError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&OrbError> for std::process::ExitCode {
    fn from(err: &OrbError) -> Self {
        let code: u8 = match err {
            OrbError::Io(_) | OrbError::Serialization(_) => 1,
            OrbError::ConfigParse { .. }
            | OrbError::ConfigMissing { .. }
            | OrbError::ConfigInvalid { .. } => 2,
            OrbError::Database { .. } | OrbError::DatabaseQuery { .. } => 3,
            OrbError::Gateway(_) => 4,
            OrbError::Data { .. } | OrbError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

/// Pipeline stage at which a single symbol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Universe,
    OpeningRange,
    Sizing,
    Submission,
    Fill,
    Exit,
    Cancel,
    ForcedExit,
    Persistence,
    Reconciliation,
}

/// A failure confined to one symbol. Runs collect these instead of aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolError {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub stage: Stage,
    pub reason: String,
}

impl SymbolError {
    pub fn new(
        trade_date: NaiveDate,
        symbol: &str,
        stage: Stage,
        reason: impl std::fmt::Display,
    ) -> Self {
        SymbolError {
            trade_date,
            symbol: symbol.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }
}
