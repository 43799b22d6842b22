//! Broker gateway port.
//!
//! Entry order specs can only be built from an [`EntryPermit`], so no code
//! path reaches `submit_order` with a new entry while the kill switch is
//! engaged. Exit specs need no permit.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::kill_switch::EntryPermit;
use crate::domain::position::{Position, Side};
use crate::domain::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderAction::Buy,
            Side::Short => OrderAction::Sell,
        }
    }

    fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderAction::Sell,
            Side::Short => OrderAction::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Triggers when price trades through `stop_price`.
    StopEntry { stop_price: f64 },
    MarketExit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    client_order_id: String,
    symbol: String,
    trade_date: NaiveDate,
    side: Side,
    action: OrderAction,
    quantity: i64,
    kind: OrderKind,
}

impl OrderSpec {
    /// Stop entry for a sized signal. Consumes the permit. Returns `None`
    /// when the signal has no size.
    pub fn stop_entry(_permit: EntryPermit, signal: &Signal) -> Option<Self> {
        let quantity = signal.quantity()?;
        let plan = signal.plan();
        Some(OrderSpec {
            client_order_id: format!("orb-{}-{}-entry", plan.symbol, plan.trade_date),
            symbol: plan.symbol.clone(),
            trade_date: plan.trade_date,
            side: plan.side,
            action: OrderAction::opening(plan.side),
            quantity,
            kind: OrderKind::StopEntry {
                stop_price: plan.entry_price,
            },
        })
    }

    /// Market order flattening `position`.
    pub fn market_exit(position: &Position) -> Self {
        OrderSpec {
            client_order_id: format!("orb-{}-{}-exit", position.symbol, position.trade_date),
            symbol: position.symbol.clone(),
            trade_date: position.trade_date,
            side: position.side,
            action: OrderAction::closing(position.side),
            quantity: position.quantity,
            kind: OrderKind::MarketExit,
        }
    }

    pub fn client_order_id(&self) -> &str {
        &self.client_order_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn action(&self) -> OrderAction {
        self.action
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.kind, OrderKind::StopEntry { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFill {
    pub order_id: String,
    pub price: f64,
    pub quantity: i64,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    /// Positive long, negative short.
    pub quantity: i64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway timeout")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("unknown order: {0}")]
    UnknownOrder(String),
}

impl GatewayError {
    /// Transient errors are worth retrying; the rest are final for the order.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::RateLimited | GatewayError::Transport(_)
        )
    }
}

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Returns the broker's order id.
    async fn submit_order(&self, spec: &OrderSpec) -> Result<String, GatewayError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// The fill for `order_id`, if it has filled.
    async fn get_fills(&self, order_id: &str) -> Result<Option<GatewayFill>, GatewayError>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError>;

    /// Latest traded price for `symbol`, if any.
    async fn last_price(&self, symbol: &str) -> Result<Option<f64>, GatewayError>;
}
