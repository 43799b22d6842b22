//! Order lifecycle manager driven step by step against the paper broker.

mod common;

use chrono::NaiveDate;
use common::*;
use orbtrader::adapters::clock::ManualClock;
use orbtrader::adapters::memory_store::MemoryStore;
use orbtrader::adapters::paper_gateway::{FaultOp, PaperGateway};
use orbtrader::domain::error::Stage;
use orbtrader::domain::execution::ExecutionCosts;
use orbtrader::domain::kill_switch::KillSwitch;
use orbtrader::domain::position::{Position, Side};
use orbtrader::domain::signal::{Signal, SignalKey, SignalStatus};
use orbtrader::domain::sizing::RiskConfig;
use orbtrader::domain::session::SessionCalendar;
use orbtrader::domain::strategy::{arm_signal, EntryPlan};
use orbtrader::live::order_manager::OrderManager;
use orbtrader::live::retry::RetryPolicy;
use orbtrader::ports::gateway_port::{BrokerGateway, GatewayError, OrderSpec};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    manager: OrderManager,
    gateway: Arc<PaperGateway>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    kill_switch: KillSwitch,
    key: SignalKey,
    d: NaiveDate,
}

fn signal(d: NaiveDate) -> Signal {
    let plan = EntryPlan {
        symbol: "X".into(),
        trade_date: d,
        side: Side::Long,
        entry_price: 10.0,
        stop_price: 9.8,
        target_price: None,
        atr_14: 2.0,
        avg_volume_14: 2_000_000.0,
        rank: 1,
        rvol: 3.0,
    };
    let (signal, error) = arm_signal(plan, 100_000.0, &RiskConfig::default(), at(d, 9, 35));
    assert!(error.is_none());
    signal
}

fn fixture(bars: Vec<IntradayBar>) -> Fixture {
    let d = date("2024-03-01");
    let clock = Arc::new(ManualClock::new(at(d, 9, 35)));
    let gateway = Arc::new(PaperGateway::new(clock.clone(), 0.0));
    gateway.load_bars("X", bars);
    let store = Arc::new(MemoryStore::new());
    let kill_switch = KillSwitch::new();
    let manager = OrderManager::new(
        gateway.clone(),
        store.clone(),
        clock.clone(),
        kill_switch.clone(),
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            timeout: Duration::from_secs(1),
        },
        ExecutionCosts::default(),
        SessionCalendar::default(),
    );
    let s = signal(d);
    let key = s.key();
    assert!(manager.open_signal(s));
    Fixture {
        manager,
        gateway,
        store,
        clock,
        kill_switch,
        key,
        d,
    }
}

fn never_triggers(d: NaiveDate) -> Vec<IntradayBar> {
    DayBars::new("X", d)
        .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
        .flat((9, 35), (15, 59), 9.90)
        .build()
}

#[tokio::test]
async fn duplicate_signal_is_ignored() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    assert!(!f.manager.open_signal(signal(f.d)));
    assert_eq!(f.manager.keys().len(), 1);
}

#[tokio::test]
async fn exits_ignore_the_kill_switch_and_sweep_is_idempotent() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    assert!(f.manager.submit_all().await.is_empty());
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Submitted));

    f.clock.set(at(f.d, 9, 37));
    assert_eq!(f.manager.refresh_entry(&f.key).await.unwrap(), SignalStatus::Filled);

    f.kill_switch.engage();
    f.clock.set(at(f.d, 15, 55));
    let first = f.manager.forced_exit_sweep().await;
    assert_eq!(first.exited, vec!["X".to_string()]);
    assert!(first.is_clean());
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::ForcedExit));

    let second = f.manager.forced_exit_sweep().await;
    assert!(second.exited.is_empty());
    assert_eq!(f.gateway.submissions(), 2);

    let statuses: Vec<SignalStatus> = f.store.all_signals().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            SignalStatus::Pending,
            SignalStatus::Submitted,
            SignalStatus::Filled,
            SignalStatus::ForcedExit,
        ]
    );
    assert_eq!(f.store.all_trades().len(), 1);
}

#[tokio::test]
async fn entry_after_cutoff_never_reaches_gateway() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.clock.set(at(f.d, 15, 31));
    assert_eq!(f.manager.submit_entry(&f.key).await.unwrap(), SignalStatus::Cancelled);
    assert_eq!(f.gateway.submissions(), 0);
}

#[tokio::test]
async fn engaged_kill_switch_cancels_pending_entry() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.kill_switch.engage();
    assert_eq!(f.manager.submit_entry(&f.key).await.unwrap(), SignalStatus::Cancelled);
    assert_eq!(f.gateway.submissions(), 0);
    assert!(f.gateway.open_orders().is_empty());
}

#[tokio::test]
async fn rejected_submission_rejects_signal() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.gateway
        .inject_fault("X", FaultOp::Submit, GatewayError::InvalidSymbol("X".into()));
    assert_eq!(f.manager.submit_entry(&f.key).await.unwrap(), SignalStatus::Rejected);
    let errors = f.manager.take_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, Stage::Submission);
}

#[tokio::test]
async fn transient_submit_error_is_retried() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.gateway
        .inject_fault("X", FaultOp::Submit, GatewayError::RateLimited);
    assert_eq!(f.manager.submit_entry(&f.key).await.unwrap(), SignalStatus::Submitted);
    assert_eq!(f.gateway.submissions(), 2);
}

#[tokio::test]
async fn failed_fill_check_leaves_order_working() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.manager.submit_all().await;
    for _ in 0..2 {
        f.gateway
            .inject_fault("X", FaultOp::Fills, GatewayError::Transport("reset".into()));
    }
    f.clock.set(at(f.d, 9, 37));

    let err = f.manager.refresh_entry(&f.key).await.unwrap_err();
    assert_eq!(err.stage, Stage::Fill);
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Submitted));

    assert_eq!(f.manager.refresh_entry(&f.key).await.unwrap(), SignalStatus::Filled);
}

#[tokio::test]
async fn failed_cancel_is_reported_and_retried() {
    let f = fixture(never_triggers(date("2024-03-01")));
    f.manager.submit_all().await;
    f.gateway
        .inject_fault("X", FaultOp::Cancel, GatewayError::Rejected("busy".into()));

    f.clock.set(at(f.d, 15, 30));
    let first = f.manager.entry_cutoff().await;
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].stage, Stage::Cancel);
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Submitted));

    let second = f.manager.entry_cutoff().await;
    assert_eq!(second.cancelled, vec!["X".to_string()]);
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Cancelled));
}

#[tokio::test]
async fn fill_found_at_cutoff_wins_over_cancel() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    f.manager.submit_all().await;

    // no poll since submission; the cutoff sweep discovers the fill first
    f.clock.set(at(f.d, 15, 30));
    let report = f.manager.entry_cutoff().await;
    assert!(report.cancelled.is_empty());
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Filled));
}

#[tokio::test]
async fn price_through_stop_closes_position() {
    let d = date("2024-03-01");
    let bars = DayBars::new("X", d)
        .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
        .bar(9, 35, 9.95, 10.05, 9.95, 10.02)
        .bar(9, 36, 10.00, 10.00, 9.70, 9.75)
        .flat((9, 37), (15, 59), 9.75)
        .build();
    let f = fixture(bars);
    f.manager.submit_all().await;

    f.clock.set(at(d, 9, 36));
    assert_eq!(f.manager.refresh_entry(&f.key).await.unwrap(), SignalStatus::Filled);

    f.clock.set(at(d, 9, 37));
    assert_eq!(f.manager.check_exit(&f.key).await.unwrap(), SignalStatus::Stopped);
    let trades = f.manager.trades().await;
    assert_eq!(trades.len(), 1);
    approx::assert_relative_eq!(trades[0].exit_price, 9.75);
}

/// Sell 100 X straight through the broker, behind the manager's back.
async fn stray_sale(f: &Fixture) {
    let position = Position {
        symbol: "X".into(),
        trade_date: f.d,
        side: Side::Long,
        quantity: 100,
        entry_price: 10.0,
        entry_time: at(f.d, 9, 30),
        stop_price: 9.8,
        target_price: None,
    };
    f.gateway
        .submit_order(&OrderSpec::market_exit(&position))
        .await
        .unwrap();
}

#[tokio::test]
async fn positions_agree_through_fill_and_exit() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    assert!(f.manager.reconcile_positions(f.d).await.is_empty());

    f.manager.submit_all().await;
    f.clock.set(at(f.d, 9, 37));
    assert_eq!(f.manager.refresh_entry(&f.key).await.unwrap(), SignalStatus::Filled);
    assert!(f.manager.reconcile_positions(f.d).await.is_empty());

    f.clock.set(at(f.d, 15, 55));
    assert!(f.manager.forced_exit_sweep().await.is_clean());
    assert!(f.manager.reconcile_positions(f.d).await.is_empty());
    assert!(f.manager.take_errors().is_empty());
}

#[tokio::test]
async fn unexpected_broker_position_is_reported() {
    let f = fixture(stop_free_long("X", date("2024-03-01")));
    stray_sale(&f).await;

    let errors = f.manager.reconcile_positions(f.d).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].symbol, "X");
    assert_eq!(errors[0].stage, Stage::Reconciliation);
    assert!(errors[0].reason.contains("-100"), "{}", errors[0].reason);
    assert_eq!(f.manager.take_errors(), errors);
    // reporting only; nothing is sent to close the gap
    assert_eq!(f.gateway.submissions(), 1);
    assert_eq!(f.manager.status(&f.key).await, Some(SignalStatus::Pending));
}
