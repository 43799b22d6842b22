//! One trading day driven against a broker gateway.
//!
//! The driver walks the day's plan: universe refresh before the open, the
//! opening-range scan and entry submission at window end, the entry cutoff,
//! the forced-exit sweep and the close. Between tasks it polls the order
//! manager every `poll_interval`. Scan, ranking and sizing are the same
//! calls the backtest makes.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::daily_metrics::DailyMetrics;
use crate::domain::error::{Stage, SymbolError};
use crate::domain::ohlcv::IntradayBar;
use crate::domain::position::TradeRecord;
use crate::domain::signal::SignalRecord;
use crate::domain::strategy::{arm_signal, scan_day, StrategyParams};
use crate::domain::universe::select_universe;
use crate::ports::clock_port::Clock;
use crate::ports::data_port::MarketDataPort;

use super::config::LiveConfig;
use super::control::SentinelWatcher;
use super::order_manager::{OrderManager, SweepReport};
use super::scheduler::{session_plan, SessionTask};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LateTask {
    pub task: SessionTask,
    pub late_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionReport {
    pub date: Option<NaiveDate>,
    pub universe_size: usize,
    pub ranked: usize,
    pub signals: Vec<SignalRecord>,
    pub trades: Vec<TradeRecord>,
    pub errors: Vec<SymbolError>,
    pub late: Vec<LateTask>,
    pub entry_cutoff: Option<SweepReport>,
    pub forced_exit: Option<SweepReport>,
}

impl SessionReport {
    pub fn pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

pub struct LiveSession {
    params: StrategyParams,
    config: LiveConfig,
    data: Arc<dyn MarketDataPort>,
    manager: Arc<OrderManager>,
    clock: Arc<dyn Clock>,
    sentinel: Option<SentinelWatcher>,
}

impl LiveSession {
    pub fn new(
        params: StrategyParams,
        config: LiveConfig,
        data: Arc<dyn MarketDataPort>,
        manager: Arc<OrderManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sentinel = config.kill_switch_file.as_ref().map(SentinelWatcher::new);
        Self {
            params,
            config,
            data,
            manager,
            clock,
            sentinel,
        }
    }

    pub fn manager(&self) -> &OrderManager {
        &self.manager
    }

    fn check_sentinel(&self) {
        if let Some(sentinel) = &self.sentinel {
            sentinel.poll(self.manager.kill_switch());
        }
    }

    pub async fn run_day(&self, date: NaiveDate) -> SessionReport {
        let plan = session_plan(&self.params.calendar, date, self.config.refresh_lead);
        let mut report = SessionReport {
            date: Some(date),
            ..SessionReport::default()
        };
        let mut metrics: Vec<DailyMetrics> = Vec::new();
        let mut retry_sweep = false;

        for (i, scheduled) in plan.iter().enumerate() {
            if let Some(late) = scheduled.wait(self.clock.as_ref()).await {
                report.late.push(LateTask {
                    task: scheduled.task,
                    late_secs: late.num_seconds(),
                });
            }
            self.check_sentinel();
            info!(task = %scheduled.task, %date, "running session task");

            match scheduled.task {
                SessionTask::UniverseRefresh => {
                    // positions carried in from elsewhere are reported, not traded
                    self.manager.reconcile_positions(date).await;
                    match self.data.daily_metrics(date) {
                        Ok(loaded) => metrics = loaded,
                        Err(e) => {
                            warn!(%date, error = %e, "daily metrics unavailable, no entries today");
                            report
                                .errors
                                .push(SymbolError::new(date, "*", Stage::Universe, e));
                        }
                    }
                }
                SessionTask::OpeningRangeScan => {
                    self.open_signals(date, &metrics, &mut report).await;
                }
                SessionTask::EntryCutoff => {
                    report.entry_cutoff = Some(self.manager.entry_cutoff().await);
                }
                SessionTask::ForcedExitSweep => {
                    let sweep = self.manager.forced_exit_sweep().await;
                    retry_sweep = !sweep.is_clean();
                    report.forced_exit = Some(sweep);
                }
                SessionTask::SessionClose => {
                    self.manager.reconcile_positions(date).await;
                }
            }

            if let Some(next) = plan.get(i + 1) {
                self.monitor_until(next.at, &mut retry_sweep).await;
            }
        }

        report.signals = self.manager.snapshots().await;
        report.trades = self.manager.trades().await;
        report.errors.extend(self.manager.take_errors());
        info!(
            %date,
            signals = report.signals.len(),
            trades = report.trades.len(),
            errors = report.errors.len(),
            pnl = report.pnl(),
            "session finished"
        );
        report
    }

    /// Scan completed opening-window bars, arm the ranked signals and submit
    /// their entries.
    async fn open_signals(&self, date: NaiveDate, metrics: &[DailyMetrics], report: &mut SessionReport) {
        let now = self.clock.now();
        let members = select_universe(&self.params.universe, metrics).members;

        let mut bars: BTreeMap<String, Vec<IntradayBar>> = BTreeMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        for member in &members {
            match self.data.intraday_bars(&member.symbol, date) {
                Ok(loaded) => {
                    let completed: Vec<IntradayBar> = loaded
                        .into_iter()
                        .filter(|b| completed_by(b, now))
                        .collect();
                    bars.insert(member.symbol.clone(), completed);
                }
                Err(e) => {
                    report.errors.push(SymbolError::new(
                        date,
                        &member.symbol,
                        Stage::OpeningRange,
                        e,
                    ));
                    failed.insert(member.symbol.clone());
                }
            }
        }

        let mut scan = scan_day(&self.params, date, metrics, &bars);
        report
            .errors
            .extend(scan.errors.drain(..).filter(|e| !failed.contains(&e.symbol)));
        report.universe_size = scan.universe.count();

        let plans = scan.take_entries(&self.params);
        report.ranked = plans.len();
        for plan in plans {
            let (signal, sizing_error) = arm_signal(plan, self.config.equity, &self.params.risk, now);
            if let Some(e) = sizing_error {
                report
                    .errors
                    .push(SymbolError::new(date, signal.symbol(), Stage::Sizing, e));
            }
            self.manager.open_signal(signal);
        }

        self.check_sentinel();
        self.manager.submit_all().await;
    }

    /// Poll the manager until `until`. After an unclean forced-exit sweep the
    /// sweep itself is retried instead.
    async fn monitor_until(&self, until: NaiveDateTime, retry_sweep: &mut bool) {
        loop {
            let now = self.clock.now();
            if now >= until {
                break;
            }
            let next = (now + self.config.poll_interval).min(until);
            self.clock.sleep_until(next).await;
            if self.clock.now() >= until {
                break;
            }
            self.check_sentinel();
            if *retry_sweep {
                *retry_sweep = !self.manager.forced_exit_sweep().await.is_clean();
            } else {
                self.manager.monitor().await;
            }
        }
    }
}

/// A one-minute bar is usable once its minute has ended.
fn completed_by(bar: &IntradayBar, now: NaiveDateTime) -> bool {
    bar.timestamp + chrono::Duration::minutes(1) <= now
}
