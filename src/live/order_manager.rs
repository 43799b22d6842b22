//! Order lifecycle manager for live and paper sessions.
//!
//! The manager is the only writer of signal state. Each signal sits behind
//! its own async mutex, held for the whole of an operation including gateway
//! calls, so two operations on one symbol never interleave while different
//! symbols proceed concurrently. Every status change is appended to the
//! record store.

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::domain::error::{Stage, SymbolError};
use crate::domain::execution::{exit_trigger_at_price, ExecutionCosts};
use crate::domain::kill_switch::KillSwitch;
use crate::domain::position::{ExitReason, Side, TradeRecord};
use crate::domain::session::SessionCalendar;
use crate::domain::signal::{
    CancelReason, Fill, RejectReason, Signal, SignalEvent, SignalKey, SignalRecord, SignalStatus,
};
use crate::ports::clock_port::Clock;
use crate::ports::gateway_port::{BrokerGateway, GatewayError, GatewayFill, OrderSpec};
use crate::ports::store_port::RecordStore;

use super::retry::{with_retry, RetryPolicy};

type SharedSignal = Arc<AsyncMutex<Signal>>;

/// Outcome of a sweep over every signal of the day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub exited: Vec<String>,
    pub cancelled: Vec<String>,
    /// Signals already terminal, or left in place after an error.
    pub skipped: usize,
    pub errors: Vec<SymbolError>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum SweepOutcome {
    Exited(String),
    Cancelled(String),
    Skipped,
    Failed(SymbolError),
}

pub struct OrderManager {
    gateway: Arc<dyn BrokerGateway>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    kill_switch: KillSwitch,
    retry: RetryPolicy,
    costs: ExecutionCosts,
    calendar: SessionCalendar,
    signals: Mutex<BTreeMap<SignalKey, SharedSignal>>,
    errors: Mutex<Vec<SymbolError>>,
}

fn fill_from(fill: &GatewayFill) -> Fill {
    Fill {
        price: fill.price,
        quantity: fill.quantity,
        at: fill.at,
    }
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        kill_switch: KillSwitch,
        retry: RetryPolicy,
        costs: ExecutionCosts,
        calendar: SessionCalendar,
    ) -> Self {
        Self {
            gateway,
            store,
            clock,
            kill_switch,
            retry,
            costs,
            calendar,
            signals: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Register a new signal. Returns false when one already exists for the
    /// same symbol and day; the existing signal is kept.
    pub fn open_signal(&self, signal: Signal) -> bool {
        let key = signal.key();
        let snapshot = signal.snapshot();
        {
            let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
            if signals.contains_key(&key) {
                debug!(%key, "signal already open");
                return false;
            }
            signals.insert(key, Arc::new(AsyncMutex::new(signal)));
        }
        self.persist_record(&snapshot);
        true
    }

    pub fn keys(&self) -> Vec<SignalKey> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn shared(&self, key: &SignalKey) -> Option<SharedSignal> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub async fn status(&self, key: &SignalKey) -> Option<SignalStatus> {
        let shared = self.shared(key)?;
        let signal = shared.lock().await;
        Some(signal.status())
    }

    pub async fn snapshots(&self) -> Vec<SignalRecord> {
        let mut out = Vec::new();
        for key in self.keys() {
            if let Some(shared) = self.shared(&key) {
                out.push(shared.lock().await.snapshot());
            }
        }
        out
    }

    /// Closed trades in symbol order.
    pub async fn trades(&self) -> Vec<TradeRecord> {
        let mut out = Vec::new();
        for key in self.keys() {
            if let Some(shared) = self.shared(&key) {
                if let Some(trade) = shared.lock().await.trade_record(&self.costs) {
                    out.push(trade);
                }
            }
        }
        out
    }

    /// Errors recorded so far, draining the buffer.
    pub fn take_errors(&self) -> Vec<SymbolError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn record_error(&self, error: SymbolError) {
        warn!(
            symbol = %error.symbol,
            stage = ?error.stage,
            reason = %error.reason,
            "symbol error"
        );
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(error);
    }

    fn persist_record(&self, record: &SignalRecord) {
        if let Err(e) = self.store.append_signal(record) {
            self.record_error(SymbolError::new(
                record.trade_date,
                &record.symbol,
                Stage::Persistence,
                e,
            ));
        }
    }

    /// Apply an event and persist the result. Closed trades are appended too.
    fn transition(&self, signal: &mut Signal, event: SignalEvent, stage: Stage) -> Result<SignalStatus, SymbolError> {
        let from = signal.status();
        let to = signal.apply(event).map_err(|e| {
            SymbolError::new(signal.plan().trade_date, signal.symbol(), stage, e)
        })?;
        info!(symbol = signal.symbol(), %from, %to, "signal transition");
        self.persist_record(&signal.snapshot());
        if let Some(trade) = signal.trade_record(&self.costs) {
            if let Err(e) = self.store.append_trade(&trade) {
                self.record_error(SymbolError::new(
                    trade.trade_date,
                    &trade.symbol,
                    Stage::Persistence,
                    e,
                ));
            }
        }
        Ok(to)
    }

    fn symbol_error(signal: &Signal, stage: Stage, reason: impl std::fmt::Display) -> SymbolError {
        SymbolError::new(signal.plan().trade_date, signal.symbol(), stage, reason)
    }

    /// Submit the stop entry for a PENDING signal. Entries need a permit
    /// from the kill switch and must be placed before the entry cutoff;
    /// otherwise the signal is cancelled without touching the gateway.
    pub async fn submit_entry(&self, key: &SignalKey) -> Result<SignalStatus, SymbolError> {
        let Some(shared) = self.shared(key) else {
            return Err(SymbolError::new(key.trade_date, &key.symbol, Stage::Submission, "unknown signal"));
        };
        let mut signal = shared.lock().await;
        if signal.status() != SignalStatus::Pending {
            return Ok(signal.status());
        }

        let now = self.clock.now();
        if now >= self.calendar.entry_cutoff_at(key.trade_date) {
            return self.transition(
                &mut signal,
                SignalEvent::Cancel {
                    reason: CancelReason::EntryCutoff,
                    at: now,
                },
                Stage::Submission,
            );
        }

        let Some(permit) = self.kill_switch.permit() else {
            info!(%key, "kill switch engaged, entry cancelled");
            return self.transition(
                &mut signal,
                SignalEvent::Cancel {
                    reason: CancelReason::KillSwitch,
                    at: now,
                },
                Stage::Submission,
            );
        };

        let Some(spec) = OrderSpec::stop_entry(permit, &signal) else {
            return Err(Self::symbol_error(&signal, Stage::Submission, "signal is not sized"));
        };

        match with_retry(&self.retry, "submit_order", || self.gateway.submit_order(&spec)).await {
            Ok(order_id) => self.transition(
                &mut signal,
                SignalEvent::Submit {
                    order_id,
                    at: self.clock.now(),
                },
                Stage::Submission,
            ),
            Err(e) => {
                self.record_error(Self::symbol_error(&signal, Stage::Submission, &e));
                self.transition(
                    &mut signal,
                    SignalEvent::Reject {
                        reason: RejectReason::Gateway(e.to_string()),
                        at: self.clock.now(),
                    },
                    Stage::Submission,
                )
            }
        }
    }

    /// Poll the entry order of a SUBMITTED signal. Fill-check failures are
    /// recorded and leave the signal SUBMITTED.
    async fn poll_entry(&self, signal: &mut Signal) -> Result<SignalStatus, SymbolError> {
        if signal.status() != SignalStatus::Submitted {
            return Ok(signal.status());
        }
        let Some(order_id) = signal.order_id().map(str::to_string) else {
            return Ok(signal.status());
        };
        match with_retry(&self.retry, "get_fills", || self.gateway.get_fills(&order_id)).await {
            Ok(Some(fill)) => self.transition(signal, SignalEvent::Fill(fill_from(&fill)), Stage::Fill),
            Ok(None) => Ok(signal.status()),
            Err(e) => Err(Self::symbol_error(signal, Stage::Fill, e)),
        }
    }

    pub async fn refresh_entry(&self, key: &SignalKey) -> Result<SignalStatus, SymbolError> {
        let Some(shared) = self.shared(key) else {
            return Err(SymbolError::new(key.trade_date, &key.symbol, Stage::Fill, "unknown signal"));
        };
        let mut signal = shared.lock().await;
        self.poll_entry(&mut signal).await
    }

    /// Flatten a FILLED signal with a market order. A pending exit order is
    /// polled instead of being sent again, so repeated calls send one order.
    async fn close_position(
        &self,
        signal: &mut Signal,
        reason: ExitReason,
        stage: Stage,
    ) -> Result<SignalStatus, SymbolError> {
        if signal.status() != SignalStatus::Filled {
            return Ok(signal.status());
        }

        let pending = signal
            .pending_exit()
            .map(|p| (p.order_id.clone(), p.reason));
        let (order_id, reason) = match pending {
            Some(pending) => pending,
            None => {
                let Some(position) = signal.position() else {
                    return Err(Self::symbol_error(signal, stage, "filled signal without position"));
                };
                let spec = OrderSpec::market_exit(&position);
                let order_id = with_retry(&self.retry, "submit_order", || self.gateway.submit_order(&spec))
                    .await
                    .map_err(|e| Self::symbol_error(signal, stage, e))?;
                signal
                    .mark_exit_requested(order_id.clone(), reason)
                    .map_err(|e| Self::symbol_error(signal, stage, e))?;
                (order_id, reason)
            }
        };

        match with_retry(&self.retry, "get_fills", || self.gateway.get_fills(&order_id)).await {
            Ok(Some(fill)) => self.transition(
                signal,
                SignalEvent::Exit {
                    reason,
                    fill: fill_from(&fill),
                },
                stage,
            ),
            Ok(None) => Ok(signal.status()),
            Err(e) => Err(Self::symbol_error(signal, stage, e)),
        }
    }

    /// Check a FILLED signal against the latest price; stop before target.
    /// From the forced-exit deadline on, only the forced exit applies.
    pub async fn check_exit(&self, key: &SignalKey) -> Result<SignalStatus, SymbolError> {
        let Some(shared) = self.shared(key) else {
            return Err(SymbolError::new(key.trade_date, &key.symbol, Stage::Exit, "unknown signal"));
        };
        let mut signal = shared.lock().await;
        if signal.status() != SignalStatus::Filled {
            return Ok(signal.status());
        }

        if self.clock.now() >= self.calendar.forced_exit_at(key.trade_date) {
            return self
                .close_position(&mut signal, ExitReason::ForcedExit, Stage::ForcedExit)
                .await;
        }
        if let Some(pending) = signal.pending_exit() {
            let reason = pending.reason;
            return self.close_position(&mut signal, reason, Stage::Exit).await;
        }

        let symbol = key.symbol.clone();
        let price = with_retry(&self.retry, "last_price", || self.gateway.last_price(&symbol))
            .await
            .map_err(|e| Self::symbol_error(&signal, Stage::Exit, e))?;
        let hit = price.and_then(|p| {
            signal
                .position()
                .and_then(|position| exit_trigger_at_price(&position, p))
        });
        match hit {
            Some(reason) => self.close_position(&mut signal, reason, Stage::Exit).await,
            None => Ok(signal.status()),
        }
    }

    /// Cancel an unfilled entry. A final fill check runs first, and a fill
    /// discovered on the way wins over the cancel. A failed cancel leaves
    /// the signal SUBMITTED.
    async fn cancel_entry(
        &self,
        signal: &mut Signal,
        reason: CancelReason,
    ) -> Result<SignalStatus, SymbolError> {
        let now = self.clock.now();
        match signal.status() {
            SignalStatus::Pending => {
                return self.transition(signal, SignalEvent::Cancel { reason, at: now }, Stage::Cancel);
            }
            SignalStatus::Submitted => {}
            other => return Ok(other),
        }

        if let Err(e) = self.poll_entry(signal).await {
            self.record_error(e);
        }
        if signal.status() != SignalStatus::Submitted {
            return Ok(signal.status());
        }

        let Some(order_id) = signal.order_id().map(str::to_string) else {
            return self.transition(signal, SignalEvent::Cancel { reason, at: now }, Stage::Cancel);
        };
        match with_retry(&self.retry, "cancel_order", || self.gateway.cancel_order(&order_id)).await {
            Ok(()) | Err(GatewayError::UnknownOrder(_)) => self.transition(
                signal,
                SignalEvent::Cancel {
                    reason,
                    at: self.clock.now(),
                },
                Stage::Cancel,
            ),
            Err(e) => {
                let error = Self::symbol_error(signal, Stage::Cancel, &e);
                // The order may have filled while the cancel was in flight.
                if let Ok(SignalStatus::Filled) = self.poll_entry(signal).await {
                    return Ok(SignalStatus::Filled);
                }
                Err(error)
            }
        }
    }

    pub async fn cancel_unfilled(&self, key: &SignalKey, reason: CancelReason) -> Result<SignalStatus, SymbolError> {
        let Some(shared) = self.shared(key) else {
            return Err(SymbolError::new(key.trade_date, &key.symbol, Stage::Cancel, "unknown signal"));
        };
        let mut signal = shared.lock().await;
        self.cancel_entry(&mut signal, reason).await
    }

    /// Submit every PENDING entry concurrently.
    pub async fn submit_all(&self) -> Vec<SymbolError> {
        let keys = self.keys();
        let results = join_all(keys.iter().map(|key| self.submit_entry(key))).await;
        let errors: Vec<SymbolError> = results.into_iter().filter_map(Result::err).collect();
        for e in &errors {
            self.record_error(e.clone());
        }
        errors
    }

    /// One monitoring pass: poll open entries, check open positions.
    pub async fn monitor(&self) -> Vec<SymbolError> {
        let keys = self.keys();
        let results = join_all(keys.iter().map(|key| async move {
            match self.status(key).await {
                Some(SignalStatus::Submitted) => self.refresh_entry(key).await,
                Some(SignalStatus::Filled) => self.check_exit(key).await,
                Some(status) => Ok(status),
                None => Ok(SignalStatus::Cancelled),
            }
        }))
        .await;
        let errors: Vec<SymbolError> = results.into_iter().filter_map(Result::err).collect();
        for e in &errors {
            self.record_error(e.clone());
        }
        errors
    }

    /// Cancel every entry still unfilled at the entry cutoff.
    pub async fn entry_cutoff(&self) -> SweepReport {
        let keys = self.keys();
        let outcomes = join_all(keys.iter().map(|key| async move {
            let Some(shared) = self.shared(key) else {
                return SweepOutcome::Skipped;
            };
            let mut signal = shared.lock().await;
            if !matches!(signal.status(), SignalStatus::Pending | SignalStatus::Submitted) {
                return SweepOutcome::Skipped;
            }
            match self.cancel_entry(&mut signal, CancelReason::EntryCutoff).await {
                Ok(SignalStatus::Cancelled) => SweepOutcome::Cancelled(key.symbol.clone()),
                Ok(_) => SweepOutcome::Skipped,
                Err(e) => SweepOutcome::Failed(e),
            }
        }))
        .await;
        self.report(outcomes, "entry cutoff")
    }

    /// Flatten every FILLED signal and cancel every unfilled entry. Runs
    /// regardless of the kill switch. Failures stay confined to their
    /// symbol; running the sweep again sends no second exit.
    pub async fn forced_exit_sweep(&self) -> SweepReport {
        let keys = self.keys();
        let outcomes = join_all(keys.iter().map(|key| async move {
            let Some(shared) = self.shared(key) else {
                return SweepOutcome::Skipped;
            };
            let mut signal = shared.lock().await;
            if matches!(signal.status(), SignalStatus::Pending | SignalStatus::Submitted) {
                match self
                    .cancel_entry(&mut signal, CancelReason::ForcedExitDeadline)
                    .await
                {
                    Ok(SignalStatus::Cancelled) => return SweepOutcome::Cancelled(key.symbol.clone()),
                    Ok(SignalStatus::Filled) => {}
                    Ok(_) => return SweepOutcome::Skipped,
                    Err(e) => return SweepOutcome::Failed(e),
                }
            }
            if signal.status() != SignalStatus::Filled {
                return SweepOutcome::Skipped;
            }
            match self
                .close_position(&mut signal, ExitReason::ForcedExit, Stage::ForcedExit)
                .await
            {
                Ok(status) if status.is_terminal() => SweepOutcome::Exited(key.symbol.clone()),
                Ok(_) => SweepOutcome::Failed(Self::symbol_error(
                    &signal,
                    Stage::ForcedExit,
                    "exit order not yet filled",
                )),
                Err(e) => SweepOutcome::Failed(e),
            }
        }))
        .await;
        self.report(outcomes, "forced exit sweep")
    }

    fn report(&self, outcomes: Vec<SweepOutcome>, what: &str) -> SweepReport {
        let mut report = SweepReport::default();
        for outcome in outcomes {
            match outcome {
                SweepOutcome::Exited(symbol) => report.exited.push(symbol),
                SweepOutcome::Cancelled(symbol) => report.cancelled.push(symbol),
                SweepOutcome::Skipped => report.skipped += 1,
                SweepOutcome::Failed(e) => {
                    self.record_error(e.clone());
                    report.errors.push(e);
                }
            }
        }
        info!(
            sweep = what,
            exited = report.exited.len(),
            cancelled = report.cancelled.len(),
            skipped = report.skipped,
            errors = report.errors.len(),
            "sweep finished"
        );
        report
    }

    /// Compare the broker's positions with the FILLED signals. Each symbol
    /// whose net quantity disagrees is recorded as an error; nothing is
    /// traded to close the gap.
    pub async fn reconcile_positions(&self, date: NaiveDate) -> Vec<SymbolError> {
        let mut expected: BTreeMap<String, i64> = BTreeMap::new();
        for key in self.keys() {
            let Some(shared) = self.shared(&key) else {
                continue;
            };
            let signal = shared.lock().await;
            if signal.status() != SignalStatus::Filled {
                continue;
            }
            if let Some(fill) = signal.entry_fill() {
                let signed = match signal.side() {
                    Side::Long => fill.quantity,
                    Side::Short => -fill.quantity,
                };
                *expected.entry(key.symbol.clone()).or_default() += signed;
            }
        }

        let held = match with_retry(&self.retry, "get_positions", || self.gateway.get_positions()).await {
            Ok(held) => held,
            Err(e) => {
                let error = SymbolError::new(date, "*", Stage::Reconciliation, e);
                self.record_error(error.clone());
                return vec![error];
            }
        };
        let mut actual: BTreeMap<String, i64> = BTreeMap::new();
        for position in held {
            *actual.entry(position.symbol).or_default() += position.quantity;
        }

        let symbols: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
        let mut errors = Vec::new();
        for symbol in &symbols {
            let want = expected.get(*symbol).copied().unwrap_or(0);
            let have = actual.get(*symbol).copied().unwrap_or(0);
            if want != have {
                let error = SymbolError::new(
                    date,
                    symbol.as_str(),
                    Stage::Reconciliation,
                    format!("broker holds {have}, signals expect {want}"),
                );
                self.record_error(error.clone());
                errors.push(error);
            }
        }
        info!(%date, symbols = symbols.len(), mismatched = errors.len(), "positions reconciled");
        errors
    }

    /// Time the manager considers current.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }
}
