//! Deterministic backtest engine.
//!
//! Each archived day runs the same scan, ranking, planning and sizing steps
//! as the live driver. Only the fills come from bar replay instead of a
//! gateway. All collections are ordered (`BTreeMap`, sorted vectors) and the
//! engine never reads a clock, so identical inputs give identical runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::daily_metrics::DailyMetrics;
use super::error::{OrbError, Stage, SymbolError};
use super::execution::{
    apply_entry_slippage, apply_exit_slippage, entry_trigger, exit_trigger_on_bar, ExecutionCosts,
};
use super::metrics::Metrics;
use super::ohlcv::IntradayBar;
use super::portfolio::{EquityLedger, EquityPoint, ResetPeriod};
use super::position::{ExitReason, TradeRecord};
use super::ranking::SideFilter;
use super::session::SessionCalendar;
use super::signal::{CancelReason, Fill, Signal, SignalBook, SignalEvent, SignalRecord, SignalStatus, TransitionError};
use super::strategy::{arm_signal, scan_day, StrategyParams};
use super::universe::select_universe;
use crate::ports::data_port::MarketDataPort;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub compounding: bool,
    pub reset_period: ResetPeriod,
    pub costs: ExecutionCosts,
}

/// Archived inputs for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub metrics: Vec<DailyMetrics>,
    pub bars: BTreeMap<String, Vec<IntradayBar>>,
    /// Problems hit while loading this day's data.
    pub load_errors: Vec<SymbolError>,
}

impl TradingDay {
    pub fn new(date: NaiveDate, metrics: Vec<DailyMetrics>) -> Self {
        TradingDay {
            date,
            metrics,
            bars: BTreeMap::new(),
            load_errors: Vec::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<IntradayBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayResult {
    pub date: NaiveDate,
    pub universe_size: usize,
    pub ranked: usize,
    pub signals: Vec<SignalRecord>,
    pub trades: Vec<TradeRecord>,
    pub errors: Vec<SymbolError>,
}

impl DayResult {
    pub fn pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

/// Replay one signal over the day's bars: stop entry from the end of the
/// opening window, exits on later bars, forced exit at the deadline.
pub fn replay_signal(
    signal: &mut Signal,
    bars: &[IntradayBar],
    calendar: &SessionCalendar,
    costs: &ExecutionCosts,
) -> Result<(), TransitionError> {
    if signal.status() != SignalStatus::Pending {
        return Ok(());
    }
    let date = signal.plan().trade_date;
    let side = signal.side();
    let entry = signal.plan().entry_price;
    let quantity = signal.quantity().unwrap_or(0);
    let window_end = calendar.window_end_at(date);
    let cutoff = calendar.entry_cutoff_at(date);
    let deadline = calendar.forced_exit_at(date);

    signal.apply(SignalEvent::Submit {
        order_id: format!("bt-{}-{}", signal.symbol(), date),
        at: window_end,
    })?;

    let mut last_close: Option<f64> = None;
    for bar in bars
        .iter()
        .filter(|b| b.timestamp >= window_end && b.timestamp < deadline)
    {
        if !bar.is_valid() {
            warn!(symbol = %bar.symbol, at = %bar.timestamp, "skipping invalid bar");
            continue;
        }
        match signal.status() {
            SignalStatus::Submitted => {
                if bar.timestamp >= cutoff {
                    break;
                }
                if let Some(price) = entry_trigger(side, entry, bar) {
                    signal.apply(SignalEvent::Fill(Fill {
                        price: apply_entry_slippage(side, price, costs.slippage_pct),
                        quantity,
                        at: bar.timestamp,
                    }))?;
                }
            }
            SignalStatus::Filled => {
                let hit = signal
                    .position()
                    .and_then(|position| exit_trigger_on_bar(&position, bar));
                if let Some((reason, price)) = hit {
                    signal.apply(SignalEvent::Exit {
                        reason,
                        fill: Fill {
                            price: apply_exit_slippage(side, price, costs.slippage_pct),
                            quantity,
                            at: bar.timestamp,
                        },
                    })?;
                    return Ok(());
                }
            }
            _ => return Ok(()),
        }
        last_close = Some(bar.close);
    }

    match (signal.status(), last_close) {
        (SignalStatus::Submitted, _) => {
            signal.apply(SignalEvent::Cancel {
                reason: CancelReason::EntryCutoff,
                at: cutoff,
            })?;
        }
        (SignalStatus::Filled, Some(close)) => {
            signal.apply(SignalEvent::Exit {
                reason: ExitReason::ForcedExit,
                fill: Fill {
                    price: apply_exit_slippage(side, close, costs.slippage_pct),
                    quantity,
                    at: deadline,
                },
            })?;
        }
        _ => {}
    }
    Ok(())
}

/// Run one day with `equity` as the sizing base.
pub fn simulate_day(
    day: &TradingDay,
    params: &StrategyParams,
    equity: f64,
    costs: &ExecutionCosts,
) -> DayResult {
    let mut scan = scan_day(params, day.date, &day.metrics, &day.bars);
    let failed_loads: BTreeSet<&str> = day.load_errors.iter().map(|e| e.symbol.as_str()).collect();
    let mut errors = day.load_errors.clone();
    errors.extend(
        scan.errors
            .drain(..)
            .filter(|e| !failed_loads.contains(e.symbol.as_str())),
    );

    let window_end = params.calendar.window_end_at(day.date);
    let plans = scan.take_entries(params);
    let ranked = plans.len();

    let mut book = SignalBook::new();
    for plan in plans {
        let (signal, sizing_error) = arm_signal(plan, equity, &params.risk, window_end);
        if let Some(e) = sizing_error {
            errors.push(SymbolError::new(day.date, signal.symbol(), Stage::Sizing, e));
        }
        book.open(signal);
    }

    let no_bars: Vec<IntradayBar> = Vec::new();
    let keys: Vec<_> = book.iter().map(Signal::key).collect();
    for key in keys {
        let Some(signal) = book.get_mut(&key) else {
            continue;
        };
        let bars = day.bars.get(&key.symbol).unwrap_or(&no_bars);
        if let Err(e) = replay_signal(signal, bars, &params.calendar, costs) {
            errors.push(SymbolError::new(day.date, &key.symbol, Stage::Fill, e));
        }
    }

    let signals: Vec<SignalRecord> = book.iter().map(Signal::snapshot).collect();
    let trades: Vec<TradeRecord> = book.iter().filter_map(|s| s.trade_record(costs)).collect();

    debug!(
        date = %day.date,
        signals = signals.len(),
        trades = trades.len(),
        errors = errors.len(),
        "day simulated"
    );

    DayResult {
        date: day.date,
        universe_size: scan.universe.count(),
        ranked,
        signals,
        trades,
        errors,
    }
}

/// Parameters recorded alongside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub leverage: f64,
    pub risk_pct: f64,
    pub liquidity_cap_pct: Option<f64>,
    pub stop_atr_scale: f64,
    pub target_atr_scale: Option<f64>,
    pub side: SideFilter,
    pub top_n: usize,
    pub rvol_min: f64,
    pub or_window_minutes: u32,
    pub compounding: bool,
    pub reset_period: ResetPeriod,
    pub costs: ExecutionCosts,
}

impl RunParameters {
    pub fn new(params: &StrategyParams, config: &BacktestConfig) -> Self {
        RunParameters {
            start_date: config.start_date,
            end_date: config.end_date,
            initial_capital: config.initial_capital,
            leverage: params.risk.leverage,
            risk_pct: params.risk.risk_pct,
            liquidity_cap_pct: params.risk.liquidity_cap_pct,
            stop_atr_scale: params.stop_atr_scale,
            target_atr_scale: params.target_atr_scale,
            side: params.ranking.side,
            top_n: params.ranking.top_n,
            rvol_min: params.ranking.rvol_min,
            or_window_minutes: params.calendar.or_window_minutes,
            compounding: config.compounding,
            reset_period: config.reset_period,
            costs: config.costs.clone(),
        }
    }
}

/// A finished run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub parameters: RunParameters,
    pub signals: Vec<SignalRecord>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub errors: Vec<SymbolError>,
}

impl BacktestRun {
    pub fn metrics(&self) -> Metrics {
        Metrics::compute(self.parameters.initial_capital, &self.trades, &self.equity_curve)
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.parameters.initial_capital, |p| p.equity)
    }

    pub fn to_json(&self) -> Result<String, OrbError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn run_backtest(days: &[TradingDay], params: &StrategyParams, config: &BacktestConfig) -> BacktestRun {
    let mut ordered: Vec<&TradingDay> = days
        .iter()
        .filter(|d| d.date >= config.start_date && d.date <= config.end_date)
        .collect();
    ordered.sort_by_key(|d| d.date);

    let mut ledger = EquityLedger::new(config.initial_capital, config.compounding, config.reset_period);
    let mut signals = Vec::new();
    let mut trades = Vec::new();
    let mut errors = Vec::new();

    for day in ordered {
        let equity = ledger.begin_day(day.date);
        let result = simulate_day(day, params, equity, &config.costs);
        ledger.end_day(day.date, result.pnl(), result.trades.len());
        signals.extend(result.signals);
        trades.extend(result.trades);
        errors.extend(result.errors);
    }

    info!(
        days = ledger.curve().len(),
        trades = trades.len(),
        errors = errors.len(),
        final_equity = ledger.equity(),
        "backtest complete"
    );

    BacktestRun {
        parameters: RunParameters::new(params, config),
        signals,
        trades,
        equity_curve: ledger.into_curve(),
        errors,
    }
}

/// Load archived days from a data port. Bars are fetched only for symbols
/// that pass the universe filter. Per-day and per-symbol failures are kept
/// as error records; only a failure to list trading days is fatal.
pub fn load_trading_days(
    port: &dyn MarketDataPort,
    params: &StrategyParams,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<TradingDay>, OrbError> {
    let dates = port.trading_days(start, end)?;
    if dates.is_empty() {
        return Err(OrbError::NoData {
            what: format!("trading days between {start} and {end}"),
        });
    }

    let mut days = Vec::with_capacity(dates.len());
    for date in dates {
        let metrics = match port.daily_metrics(date) {
            Ok(m) => m,
            Err(e) => {
                warn!(%date, error = %e, "daily metrics unavailable");
                let mut day = TradingDay::new(date, Vec::new());
                day.load_errors
                    .push(SymbolError::new(date, "*", Stage::Universe, e));
                days.push(day);
                continue;
            }
        };

        let members = select_universe(&params.universe, &metrics).members;
        let mut day = TradingDay::new(date, metrics);
        for member in members {
            match port.intraday_bars(&member.symbol, date) {
                Ok(bars) => {
                    day.bars.insert(member.symbol.clone(), bars);
                }
                Err(e) => day.load_errors.push(SymbolError::new(
                    date,
                    &member.symbol,
                    Stage::OpeningRange,
                    e,
                )),
            }
        }
        days.push(day);
    }
    Ok(days)
}
