//! End-to-end backtests over scripted trading days.

mod common;

use approx::assert_relative_eq;
use common::*;
use orbtrader::domain::backtest::{
    load_trading_days, run_backtest, simulate_day, BacktestConfig, TradingDay,
};
use orbtrader::domain::error::Stage;
use orbtrader::domain::execution::ExecutionCosts;
use orbtrader::domain::portfolio::ResetPeriod;
use orbtrader::domain::position::{ExitReason, Side};
use orbtrader::domain::signal::SignalStatus;
use orbtrader::domain::strategy::StrategyParams;

fn config(start: &str, end: &str) -> BacktestConfig {
    BacktestConfig {
        start_date: date(start),
        end_date: date(end),
        initial_capital: 100_000.0,
        compounding: false,
        reset_period: ResetPeriod::Never,
        costs: ExecutionCosts::default(),
    }
}

/// Long breakout at 10.00 followed by a dip to 9.79 on the next bar.
fn stopped_long(symbol: &str, d: chrono::NaiveDate) -> Vec<IntradayBar> {
    DayBars::new(symbol, d)
        .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
        .bar(9, 35, 9.95, 10.05, 9.95, 10.02)
        .bar(9, 36, 10.00, 10.03, 9.79, 9.85)
        .flat((9, 37), (15, 59), 9.90)
        .build()
}

fn day(symbol: &str, d: chrono::NaiveDate, bars: Vec<IntradayBar>) -> TradingDay {
    TradingDay::new(d, vec![make_metrics(symbol, d, 10.0, 2.0)]).with_bars(symbol, bars)
}

mod scenarios {
    use super::*;

    #[test]
    fn stop_below_opening_range_high_is_hit_first() {
        let d = date("2024-03-01");
        let result = simulate_day(
            &day("X", d, stopped_long("X", d)),
            &StrategyParams::default(),
            100_000.0,
            &ExecutionCosts::default(),
        );

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert_eq!(trade.exit_reason, ExitReason::Stop);
        assert_relative_eq!(trade.entry_price, 10.00);
        assert_relative_eq!(trade.exit_price, 9.80, epsilon = 1e-9);
        assert_eq!(trade.entry_time, at(d, 9, 35));
        assert_eq!(trade.exit_time, at(d, 9, 36));
        // 1% of 100k over a 0.20 stop distance
        assert_eq!(trade.quantity, 5_000);
        assert_relative_eq!(trade.pnl, -1_000.0, epsilon = 1e-6);
        assert_eq!(result.signals[0].status, SignalStatus::Stopped);
    }

    #[test]
    fn quiet_day_closes_at_last_bar_before_deadline() {
        let d = date("2024-03-01");
        let result = simulate_day(
            &day("X", d, stop_free_long("X", d)),
            &StrategyParams::default(),
            100_000.0,
            &ExecutionCosts::default(),
        );

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::ForcedExit);
        assert_relative_eq!(trade.exit_price, 10.20, epsilon = 1e-9);
        assert_eq!(trade.exit_time, at(d, 15, 55));
        assert_relative_eq!(trade.pnl, 1_000.0, epsilon = 1e-6);
        assert_eq!(result.signals[0].status, SignalStatus::ForcedExit);
    }

    #[test]
    fn rvol_tie_is_broken_by_symbol() {
        let d = date("2024-03-01");
        let trading_day = TradingDay::new(
            d,
            vec![make_metrics("BBB", d, 10.0, 2.0), make_metrics("AAA", d, 10.0, 2.0)],
        )
        .with_bars("BBB", stop_free_long("BBB", d))
        .with_bars("AAA", stop_free_long("AAA", d));

        let params = StrategyParams::default();
        let first = simulate_day(&trading_day, &params, 100_000.0, &ExecutionCosts::default());
        let ranks: Vec<(String, usize)> = first
            .signals
            .iter()
            .map(|s| (s.symbol.clone(), s.rank))
            .collect();
        assert_eq!(ranks, vec![("AAA".to_string(), 1), ("BBB".to_string(), 2)]);

        for _ in 0..5 {
            let again = simulate_day(&trading_day, &params, 100_000.0, &ExecutionCosts::default());
            assert_eq!(again, first);
        }

        let mut top_one = params.clone();
        top_one.ranking.top_n = 1;
        let result = simulate_day(&trading_day, &top_one, 100_000.0, &ExecutionCosts::default());
        assert_eq!(result.signals.len(), 1);
        assert_eq!(result.signals[0].symbol, "AAA");
    }

    #[test]
    fn optional_target_takes_profit() {
        let d = date("2024-03-01");
        let bars = DayBars::new("X", d)
            .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
            .bar(9, 35, 9.95, 10.05, 9.95, 10.02)
            .bar(10, 0, 10.30, 10.55, 10.30, 10.50)
            .flat((9, 36), (15, 59), 10.10)
            .build();
        let mut params = StrategyParams::default();
        params.target_atr_scale = Some(0.25);

        let result = simulate_day(&day("X", d, bars), &params, 100_000.0, &ExecutionCosts::default());
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Target);
        assert_relative_eq!(trade.exit_price, 10.50, epsilon = 1e-9);
        assert_eq!(trade.exit_time, at(d, 10, 0));
    }

    #[test]
    fn untriggered_entry_is_cancelled_at_cutoff() {
        let d = date("2024-03-01");
        let bars = DayBars::new("X", d)
            .opening_range(9.85, 10.00, 9.80, 9.95, 100_000)
            .flat((9, 35), (15, 59), 9.90)
            .build();
        let result = simulate_day(&day("X", d, bars), &StrategyParams::default(), 100_000.0, &ExecutionCosts::default());
        assert!(result.trades.is_empty());
        assert_eq!(result.signals[0].status, SignalStatus::Cancelled);
    }

    #[test]
    fn costs_reduce_pnl() {
        let d = date("2024-03-01");
        let costs = ExecutionCosts {
            commission_per_trade: 1.0,
            ..ExecutionCosts::default()
        };
        let result = simulate_day(&day("X", d, stop_free_long("X", d)), &StrategyParams::default(), 100_000.0, &costs);
        let trade = &result.trades[0];
        assert_relative_eq!(trade.commission, 2.0);
        assert_relative_eq!(trade.pnl, trade.gross_pnl - 2.0, epsilon = 1e-9);
    }
}

mod runs {
    use super::*;

    fn three_days() -> Vec<TradingDay> {
        vec![
            day("X", date("2024-01-02"), stopped_long("X", date("2024-01-02"))),
            day("X", date("2024-01-03"), stopped_long("X", date("2024-01-03"))),
            day("X", date("2024-02-01"), stopped_long("X", date("2024-02-01"))),
        ]
    }

    #[test]
    fn identical_inputs_give_identical_runs() {
        let mut days = three_days();
        days.push(
            TradingDay::new(
                date("2024-01-04"),
                vec![make_metrics("AAA", date("2024-01-04"), 10.0, 2.0), make_metrics("BBB", date("2024-01-04"), 10.0, 2.0)],
            )
            .with_bars("AAA", stop_free_long("AAA", date("2024-01-04")))
            .with_bars("BBB", stopped_long("BBB", date("2024-01-04"))),
        );
        let params = StrategyParams::default();
        let cfg = config("2024-01-01", "2024-12-31");

        let first = run_backtest(&days, &params, &cfg);
        let second = run_backtest(&days, &params, &cfg);
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(first.trades.len(), 5);
    }

    #[test]
    fn days_run_in_date_order_within_range() {
        let mut days = three_days();
        days.reverse();
        let run = run_backtest(&days, &StrategyParams::default(), &config("2024-01-03", "2024-01-31"));
        let dates: Vec<_> = run.equity_curve.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date("2024-01-03")]);
    }

    #[test]
    fn compounding_resets_at_month_boundary() {
        let mut cfg = config("2024-01-01", "2024-12-31");
        cfg.compounding = true;
        cfg.reset_period = ResetPeriod::Month;

        let run = run_backtest(&three_days(), &StrategyParams::default(), &cfg);
        let quantities: Vec<i64> = run.trades.iter().map(|t| t.quantity).collect();
        // 1% of 99,000 over 0.20 on the second day, back to 100,000 in February
        assert_eq!(quantities, vec![5_000, 4_950, 5_000]);

        let resets: Vec<bool> = run.equity_curve.iter().map(|p| p.reset).collect();
        assert_eq!(resets, vec![false, false, true]);
        assert_relative_eq!(run.equity_curve[2].equity, 99_000.0, epsilon = 1e-6);
        assert_relative_eq!(run.equity_curve[2].cumulative_pnl, -3_000.0, epsilon = 1e-6);
    }

    #[test]
    fn without_compounding_every_day_sizes_off_initial_capital() {
        let run = run_backtest(&three_days(), &StrategyParams::default(), &config("2024-01-01", "2024-12-31"));
        let quantities: Vec<i64> = run.trades.iter().map(|t| t.quantity).collect();
        assert_eq!(quantities, vec![5_000, 5_000, 5_000]);
        assert_relative_eq!(run.final_equity(), 97_000.0, epsilon = 1e-6);

        let metrics = run.metrics();
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.stopped, 3);
        assert_relative_eq!(metrics.total_pnl, -3_000.0, epsilon = 1e-6);
    }
}

mod loading {
    use super::*;

    #[test]
    fn symbol_data_errors_are_recorded_and_the_run_completes() {
        let d = date("2024-03-01");
        let port = MockDataPort::new()
            .with_metrics(make_metrics("AAA", d, 10.0, 2.0))
            .with_metrics(make_metrics("BBB", d, 10.0, 2.0))
            .with_bars(stop_free_long("BBB", d))
            .with_error("AAA", "connection reset");

        let params = StrategyParams::default();
        let days = load_trading_days(&port, &params, d, d).unwrap();
        assert_eq!(days.len(), 1);

        let run = run_backtest(&days, &params, &config("2024-03-01", "2024-03-01"));
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].symbol, "BBB");
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].symbol, "AAA");
        assert_eq!(run.errors[0].stage, Stage::OpeningRange);
    }

    #[test]
    fn empty_range_is_no_data() {
        let port = MockDataPort::new();
        let result = load_trading_days(&port, &StrategyParams::default(), date("2024-01-01"), date("2024-01-31"));
        assert!(matches!(
            result,
            Err(orbtrader::domain::error::OrbError::NoData { .. })
        ));
    }

    #[test]
    fn symbols_outside_universe_are_not_loaded() {
        let d = date("2024-03-01");
        let mut cheap = make_metrics("PENNY", d, 1.0, 2.0);
        cheap.prev_close = Some(1.0);
        let port = MockDataPort::new()
            .with_metrics(cheap)
            .with_metrics(make_metrics("X", d, 10.0, 2.0))
            .with_bars(stop_free_long("X", d))
            .with_error("PENNY", "must not be requested");

        let days = load_trading_days(&port, &StrategyParams::default(), d, d).unwrap();
        assert!(days[0].load_errors.is_empty());
        assert_eq!(days[0].bars.keys().collect::<Vec<_>>(), vec!["X"]);
    }
}
