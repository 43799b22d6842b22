//! Signal lifecycle state machine.
//!
//! A signal is created PENDING from an entry plan and moves only through
//! [`Signal::apply`], which checks every event against
//! [`SignalStatus::can_transition_to`]. Terminal states accept nothing.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::execution::{settle, ExecutionCosts};
use super::position::{ExitReason, Position, Side, TradeRecord};
use super::sizing::PositionSize;
use super::strategy::EntryPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Submitted,
    Filled,
    Rejected,
    Stopped,
    TargetHit,
    ForcedExit,
    Cancelled,
}

impl SignalStatus {
    pub const ALL: [SignalStatus; 8] = [
        SignalStatus::Pending,
        SignalStatus::Submitted,
        SignalStatus::Filled,
        SignalStatus::Rejected,
        SignalStatus::Stopped,
        SignalStatus::TargetHit,
        SignalStatus::ForcedExit,
        SignalStatus::Cancelled,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SignalStatus::Rejected
                | SignalStatus::Stopped
                | SignalStatus::TargetHit
                | SignalStatus::ForcedExit
                | SignalStatus::Cancelled
        )
    }

    /// The full transition table.
    pub const fn can_transition_to(self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Submitted, Filled)
                | (Submitted, Rejected)
                | (Submitted, Cancelled)
                | (Filled, Stopped)
                | (Filled, TargetHit)
                | (Filled, ForcedExit)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Pending => "PENDING",
            SignalStatus::Submitted => "SUBMITTED",
            SignalStatus::Filled => "FILLED",
            SignalStatus::Rejected => "REJECTED",
            SignalStatus::Stopped => "STOPPED",
            SignalStatus::TargetHit => "TARGET_HIT",
            SignalStatus::ForcedExit => "FORCED_EXIT",
            SignalStatus::Cancelled => "CANCELLED",
        }
    }

    fn from_exit(reason: ExitReason) -> Self {
        match reason {
            ExitReason::Stop => SignalStatus::Stopped,
            ExitReason::Target => SignalStatus::TargetHit,
            ExitReason::ForcedExit => SignalStatus::ForcedExit,
        }
    }

    pub fn exit_reason(self) -> Option<ExitReason> {
        match self {
            SignalStatus::Stopped => Some(ExitReason::Stop),
            SignalStatus::TargetHit => Some(ExitReason::Target),
            SignalStatus::ForcedExit => Some(ExitReason::ForcedExit),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    InsufficientSize,
    Sizing(String),
    Gateway(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InsufficientSize => f.write_str("INSUFFICIENT_SIZE"),
            RejectReason::Sizing(reason) => write!(f, "sizing: {reason}"),
            RejectReason::Gateway(reason) => write!(f, "gateway: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    KillSwitch,
    EntryCutoff,
    ForcedExitDeadline,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::KillSwitch => f.write_str("kill switch active"),
            CancelReason::EntryCutoff => f.write_str("entry cutoff"),
            CancelReason::ForcedExitDeadline => f.write_str("forced exit deadline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: i64,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Submit { order_id: String, at: NaiveDateTime },
    Fill(Fill),
    Reject { reason: RejectReason, at: NaiveDateTime },
    Cancel { reason: CancelReason, at: NaiveDateTime },
    Exit { reason: ExitReason, fill: Fill },
}

impl SignalEvent {
    fn target_status(&self) -> SignalStatus {
        match self {
            SignalEvent::Submit { .. } => SignalStatus::Submitted,
            SignalEvent::Fill(_) => SignalStatus::Filled,
            SignalEvent::Reject { .. } => SignalStatus::Rejected,
            SignalEvent::Cancel { .. } => SignalStatus::Cancelled,
            SignalEvent::Exit { reason, .. } => SignalStatus::from_exit(*reason),
        }
    }

    fn at(&self) -> NaiveDateTime {
        match self {
            SignalEvent::Submit { at, .. }
            | SignalEvent::Reject { at, .. }
            | SignalEvent::Cancel { at, .. } => *at,
            SignalEvent::Fill(fill) | SignalEvent::Exit { fill, .. } => fill.at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal {
        from: SignalStatus,
        to: SignalStatus,
    },

    #[error("signal has no profit target")]
    NoTarget,

    #[error("signal must be sized before submission")]
    Unsized,

    #[error("signal can only be sized while PENDING")]
    AlreadySized,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalKey {
    pub symbol: String,
    pub trade_date: NaiveDate,
}

impl SignalKey {
    pub fn new(symbol: &str, trade_date: NaiveDate) -> Self {
        SignalKey {
            symbol: symbol.to_string(),
            trade_date,
        }
    }
}

impl std::fmt::Display for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.trade_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<SignalStatus>,
    pub to: SignalStatus,
    pub at: NaiveDateTime,
}

/// An exit order that has been sent but whose fill has not been seen yet.
/// The signal stays FILLED until the fill arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExit {
    pub order_id: String,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    plan: EntryPlan,
    status: SignalStatus,
    size: Option<PositionSize>,
    order_id: Option<String>,
    entry_fill: Option<Fill>,
    exit_fill: Option<Fill>,
    pending_exit: Option<PendingExit>,
    reject_reason: Option<RejectReason>,
    cancel_reason: Option<CancelReason>,
    history: Vec<StatusChange>,
}

impl Signal {
    pub fn new(plan: EntryPlan, at: NaiveDateTime) -> Self {
        Signal {
            plan,
            status: SignalStatus::Pending,
            size: None,
            order_id: None,
            entry_fill: None,
            exit_fill: None,
            pending_exit: None,
            reject_reason: None,
            cancel_reason: None,
            history: vec![StatusChange {
                from: None,
                to: SignalStatus::Pending,
                at,
            }],
        }
    }

    pub fn key(&self) -> SignalKey {
        SignalKey::new(&self.plan.symbol, self.plan.trade_date)
    }

    pub fn plan(&self) -> &EntryPlan {
        &self.plan
    }

    pub fn symbol(&self) -> &str {
        &self.plan.symbol
    }

    pub fn side(&self) -> Side {
        self.plan.side
    }

    pub fn status(&self) -> SignalStatus {
        self.status
    }

    pub fn size(&self) -> Option<&PositionSize> {
        self.size.as_ref()
    }

    pub fn quantity(&self) -> Option<i64> {
        self.size.map(|s| s.shares)
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn entry_fill(&self) -> Option<&Fill> {
        self.entry_fill.as_ref()
    }

    pub fn exit_fill(&self) -> Option<&Fill> {
        self.exit_fill.as_ref()
    }

    pub fn pending_exit(&self) -> Option<&PendingExit> {
        self.pending_exit.as_ref()
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        self.reject_reason.as_ref()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn set_size(&mut self, size: PositionSize) -> Result<(), TransitionError> {
        if self.status != SignalStatus::Pending || self.size.is_some() {
            return Err(TransitionError::AlreadySized);
        }
        self.size = Some(size);
        Ok(())
    }

    /// Record an exit order in flight. Only meaningful while FILLED.
    pub fn mark_exit_requested(&mut self, order_id: String, reason: ExitReason) -> Result<(), TransitionError> {
        if self.status != SignalStatus::Filled {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: SignalStatus::from_exit(reason),
            });
        }
        self.pending_exit = Some(PendingExit { order_id, reason });
        Ok(())
    }

    pub fn clear_pending_exit(&mut self) {
        self.pending_exit = None;
    }

    pub fn apply(&mut self, event: SignalEvent) -> Result<SignalStatus, TransitionError> {
        let next = event.target_status();
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        let at = event.at();

        match event {
            SignalEvent::Submit { order_id, .. } => {
                if self.size.is_none() {
                    return Err(TransitionError::Unsized);
                }
                self.order_id = Some(order_id);
            }
            SignalEvent::Fill(fill) => self.entry_fill = Some(fill),
            SignalEvent::Reject { reason, .. } => self.reject_reason = Some(reason),
            SignalEvent::Cancel { reason, .. } => self.cancel_reason = Some(reason),
            SignalEvent::Exit { reason, fill } => {
                if reason == ExitReason::Target && self.plan.target_price.is_none() {
                    return Err(TransitionError::NoTarget);
                }
                self.exit_fill = Some(fill);
                self.pending_exit = None;
            }
        }

        self.history.push(StatusChange {
            from: Some(self.status),
            to: next,
            at,
        });
        self.status = next;
        Ok(next)
    }

    /// The open position, present only while FILLED.
    pub fn position(&self) -> Option<Position> {
        if self.status != SignalStatus::Filled {
            return None;
        }
        let fill = self.entry_fill.as_ref()?;
        Some(Position {
            symbol: self.plan.symbol.clone(),
            trade_date: self.plan.trade_date,
            side: self.plan.side,
            quantity: fill.quantity,
            entry_price: fill.price,
            entry_time: fill.at,
            stop_price: self.plan.stop_price,
            target_price: self.plan.target_price,
        })
    }

    /// The closed trade, present once the signal reached an exit state.
    pub fn trade_record(&self, costs: &ExecutionCosts) -> Option<TradeRecord> {
        let exit_reason = self.status.exit_reason()?;
        let entry = self.entry_fill.as_ref()?;
        let exit = self.exit_fill.as_ref()?;
        let position = Position {
            symbol: self.plan.symbol.clone(),
            trade_date: self.plan.trade_date,
            side: self.plan.side,
            quantity: entry.quantity,
            entry_price: entry.price,
            entry_time: entry.at,
            stop_price: self.plan.stop_price,
            target_price: self.plan.target_price,
        };
        let settlement = settle(&position, exit.price, costs);
        Some(TradeRecord {
            symbol: self.plan.symbol.clone(),
            trade_date: self.plan.trade_date,
            side: self.plan.side,
            quantity: entry.quantity,
            entry_price: entry.price,
            exit_price: exit.price,
            entry_time: entry.at,
            exit_time: exit.at,
            exit_reason,
            rank: self.plan.rank,
            rvol: self.plan.rvol,
            is_capped: self.size.is_some_and(|s| s.is_capped),
            gross_pnl: settlement.gross_pnl,
            commission: settlement.commission,
            pnl: settlement.pnl,
        })
    }

    pub fn snapshot(&self) -> SignalRecord {
        SignalRecord {
            symbol: self.plan.symbol.clone(),
            trade_date: self.plan.trade_date,
            side: self.plan.side,
            status: self.status,
            entry_price: self.plan.entry_price,
            stop_price: self.plan.stop_price,
            target_price: self.plan.target_price,
            rank: self.plan.rank,
            rvol: self.plan.rvol,
            quantity: self.quantity(),
            is_capped: self.size.is_some_and(|s| s.is_capped),
            order_id: self.order_id.clone(),
            entry_fill_price: self.entry_fill.as_ref().map(|f| f.price),
            exit_fill_price: self.exit_fill.as_ref().map(|f| f.price),
            reason: self
                .reject_reason
                .as_ref()
                .map(ToString::to_string)
                .or_else(|| self.cancel_reason.map(|c| c.to_string())),
            updated_at: self.history.last().map(|h| h.at),
        }
    }
}

/// Flat, serializable view of a signal at one point in its life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub side: Side,
    pub status: SignalStatus,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub rank: usize,
    pub rvol: f64,
    pub quantity: Option<i64>,
    pub is_capped: bool,
    pub order_id: Option<String>,
    pub entry_fill_price: Option<f64>,
    pub exit_fill_price: Option<f64>,
    pub reason: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

/// Signals keyed by (symbol, trade_date). Holds at most one signal per key.
#[derive(Debug, Clone, Default)]
pub struct SignalBook {
    signals: BTreeMap<SignalKey, Signal>,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new signal. Returns false, leaving the book untouched, when
    /// the key already has one.
    pub fn open(&mut self, signal: Signal) -> bool {
        let key = signal.key();
        if self.signals.contains_key(&key) {
            return false;
        }
        self.signals.insert(key, signal);
        true
    }

    pub fn get(&self, key: &SignalKey) -> Option<&Signal> {
        self.signals.get(key)
    }

    pub fn get_mut(&mut self, key: &SignalKey) -> Option<&mut Signal> {
        self.signals.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn non_terminal(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values().filter(|s| !s.status().is_terminal())
    }

    pub fn into_signals(self) -> impl Iterator<Item = Signal> {
        self.signals.into_values()
    }
}
