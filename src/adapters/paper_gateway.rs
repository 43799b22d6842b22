//! Paper broker: replays one-minute bars against a shared clock.
//!
//! A bar counts as traded once its minute has fully elapsed on the clock.
//! Stop entries fill on the first traded bar that ends after submission and
//! crosses the stop, priced with the same gap-aware trigger the backtest
//! engine uses. Market exits fill immediately at the last traded close.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::domain::execution::{apply_entry_slippage, apply_exit_slippage, entry_trigger};
use crate::domain::ohlcv::IntradayBar;
use crate::ports::clock_port::Clock;
use crate::ports::gateway_port::{
    BrokerGateway, BrokerPosition, GatewayError, GatewayFill, OrderAction, OrderKind, OrderSpec,
};

const BAR_MINUTES: i64 = 1;

/// Gateway operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultOp {
    Submit,
    Cancel,
    Fills,
    Price,
}

#[derive(Debug, Clone, PartialEq)]
enum OrderState {
    Open,
    Filled(GatewayFill),
    Cancelled,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    spec: OrderSpec,
    submitted_at: NaiveDateTime,
    state: OrderState,
}

#[derive(Debug, Default)]
struct PaperState {
    bars: BTreeMap<String, Vec<IntradayBar>>,
    orders: BTreeMap<String, PaperOrder>,
    positions: BTreeMap<String, BrokerPosition>,
    faults: BTreeMap<(String, FaultOp), VecDeque<GatewayError>>,
    submissions: usize,
    next_id: u64,
}

impl PaperState {
    fn take_fault(&mut self, symbol: &str, op: FaultOp) -> Option<GatewayError> {
        self.faults
            .get_mut(&(symbol.to_string(), op))
            .and_then(VecDeque::pop_front)
    }

    fn traded_bars<'a>(&'a self, symbol: &str, now: NaiveDateTime) -> impl Iterator<Item = &'a IntradayBar> {
        self.bars
            .get(symbol)
            .into_iter()
            .flatten()
            .filter(move |b| b.timestamp + Duration::minutes(BAR_MINUTES) <= now)
    }

    fn last_close(&self, symbol: &str, now: NaiveDateTime) -> Option<f64> {
        self.traded_bars(symbol, now).last().map(|b| b.close)
    }

    fn book_fill(&mut self, spec: &OrderSpec, fill: &GatewayFill) {
        let signed = match spec.action() {
            OrderAction::Buy => fill.quantity,
            OrderAction::Sell => -fill.quantity,
        };
        let position = self
            .positions
            .entry(spec.symbol().to_string())
            .or_insert_with(|| BrokerPosition {
                symbol: spec.symbol().to_string(),
                quantity: 0,
                avg_price: 0.0,
            });
        if position.quantity == 0 {
            position.avg_price = fill.price;
        }
        position.quantity += signed;
        if position.quantity == 0 {
            self.positions.remove(spec.symbol());
        }
    }

    /// Fill an open stop entry if a traded bar has crossed its stop.
    fn try_fill(&mut self, order_id: &str, now: NaiveDateTime, slippage_pct: f64) {
        let Some(order) = self.orders.get(order_id) else {
            return;
        };
        if order.state != OrderState::Open {
            return;
        }
        let OrderKind::StopEntry { stop_price } = order.spec.kind() else {
            return;
        };
        let side = order.spec.side();
        let submitted_at = order.submitted_at;
        let hit = self
            .traded_bars(order.spec.symbol(), now)
            .filter(|b| b.timestamp + Duration::minutes(BAR_MINUTES) > submitted_at)
            .filter(|b| b.is_valid())
            .find_map(|b| entry_trigger(side, stop_price, b).map(|price| (price, b.timestamp)));

        if let Some((price, at)) = hit {
            let fill = GatewayFill {
                order_id: order_id.to_string(),
                price: apply_entry_slippage(side, price, slippage_pct),
                quantity: order.spec.quantity(),
                at,
            };
            let spec = order.spec.clone();
            self.book_fill(&spec, &fill);
            if let Some(order) = self.orders.get_mut(order_id) {
                order.state = OrderState::Filled(fill);
            }
        }
    }
}

pub struct PaperGateway {
    clock: Arc<dyn Clock>,
    slippage_pct: f64,
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(clock: Arc<dyn Clock>, slippage_pct: f64) -> Self {
        Self {
            clock,
            slippage_pct,
            state: Mutex::new(PaperState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bars the gateway replays for `symbol`. Replaces earlier bars.
    pub fn load_bars(&self, symbol: &str, mut bars: Vec<IntradayBar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.state().bars.insert(symbol.to_string(), bars);
    }

    /// Queue an error returned by the next `op` call touching `symbol`.
    pub fn inject_fault(&self, symbol: &str, op: FaultOp, error: GatewayError) {
        self.state()
            .faults
            .entry((symbol.to_string(), op))
            .or_default()
            .push_back(error);
    }

    /// Number of `submit_order` calls that reached the broker.
    pub fn submissions(&self) -> usize {
        self.state().submissions
    }

    /// Open entry orders that are neither filled nor cancelled.
    pub fn open_orders(&self) -> Vec<OrderSpec> {
        self.state()
            .orders
            .values()
            .filter(|o| o.state == OrderState::Open)
            .map(|o| o.spec.clone())
            .collect()
    }

    fn symbol_of(&self, order_id: &str) -> Result<String, GatewayError> {
        self.state()
            .orders
            .get(order_id)
            .map(|o| o.spec.symbol().to_string())
            .ok_or_else(|| GatewayError::UnknownOrder(order_id.to_string()))
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn submit_order(&self, spec: &OrderSpec) -> Result<String, GatewayError> {
        let now = self.clock.now();
        let mut state = self.state();
        state.submissions += 1;
        if let Some(err) = state.take_fault(spec.symbol(), FaultOp::Submit) {
            return Err(err);
        }
        if !state.bars.contains_key(spec.symbol()) {
            return Err(GatewayError::InvalidSymbol(spec.symbol().to_string()));
        }

        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);

        match spec.kind() {
            OrderKind::MarketExit => {
                let Some(close) = state.last_close(spec.symbol(), now) else {
                    return Err(GatewayError::Rejected(format!(
                        "no traded price for {}",
                        spec.symbol()
                    )));
                };
                let fill = GatewayFill {
                    order_id: order_id.clone(),
                    price: apply_exit_slippage(spec.side(), close, self.slippage_pct),
                    quantity: spec.quantity(),
                    at: now,
                };
                state.book_fill(spec, &fill);
                state.orders.insert(
                    order_id.clone(),
                    PaperOrder {
                        spec: spec.clone(),
                        submitted_at: now,
                        state: OrderState::Filled(fill),
                    },
                );
                info!(%order_id, symbol = spec.symbol(), "market exit filled");
            }
            OrderKind::StopEntry { stop_price } => {
                state.orders.insert(
                    order_id.clone(),
                    PaperOrder {
                        spec: spec.clone(),
                        submitted_at: now,
                        state: OrderState::Open,
                    },
                );
                debug!(%order_id, symbol = spec.symbol(), stop_price, "stop entry accepted");
            }
        }
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let symbol = self.symbol_of(order_id)?;
        let now = self.clock.now();
        let mut state = self.state();
        if let Some(err) = state.take_fault(&symbol, FaultOp::Cancel) {
            return Err(err);
        }
        state.try_fill(order_id, now, self.slippage_pct);
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(GatewayError::UnknownOrder(order_id.to_string()));
        };
        match order.state {
            OrderState::Filled(_) => Err(GatewayError::Rejected(format!(
                "order {order_id} already filled"
            ))),
            OrderState::Open | OrderState::Cancelled => {
                order.state = OrderState::Cancelled;
                Ok(())
            }
        }
    }

    async fn get_fills(&self, order_id: &str) -> Result<Option<GatewayFill>, GatewayError> {
        let symbol = self.symbol_of(order_id)?;
        let now = self.clock.now();
        let mut state = self.state();
        if let Some(err) = state.take_fault(&symbol, FaultOp::Fills) {
            return Err(err);
        }
        state.try_fill(order_id, now, self.slippage_pct);
        Ok(state.orders.get(order_id).and_then(|o| match &o.state {
            OrderState::Filled(fill) => Some(fill.clone()),
            _ => None,
        }))
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        Ok(self.state().positions.values().cloned().collect())
    }

    async fn last_price(&self, symbol: &str) -> Result<Option<f64>, GatewayError> {
        let now = self.clock.now();
        let mut state = self.state();
        if let Some(err) = state.take_fault(symbol, FaultOp::Price) {
            return Err(err);
        }
        if !state.bars.contains_key(symbol) {
            return Err(GatewayError::InvalidSymbol(symbol.to_string()));
        }
        Ok(state.last_close(symbol, now))
    }
}
