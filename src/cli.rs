//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::clock::{ManualClock, SystemClock};
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_store::MemoryStore;
use crate::adapters::paper_gateway::PaperGateway;
use crate::domain::backtest::{load_trading_days, run_backtest, BacktestConfig, BacktestRun};
use crate::domain::config_validation::{
    build_backtest_config, build_costs, build_strategy_params, non_empty,
};
use crate::domain::error::OrbError;
use crate::domain::execution::ExecutionCosts;
use crate::domain::kill_switch::KillSwitch;
use crate::domain::metrics::Metrics;
use crate::domain::ranking::SideFilter;
use crate::domain::strategy::{arm_signal, scan_day, StrategyParams};
use crate::domain::sweep::{parse_list, run_sweep, ParameterGrid};
use crate::domain::universe::select_universe;
use crate::live::config::{build_live_config, LiveConfig};
use crate::live::control::engage_on_ctrl_c;
use crate::live::order_manager::OrderManager;
use crate::live::session::{LiveSession, SessionReport};
use crate::ports::clock_port::Clock;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataPort;
use crate::ports::store_port::RecordStore;

#[derive(Parser, Debug)]
#[command(name = "orbtrader", about = "Opening range breakout trading system")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over archived data
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Write the full run as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Append the run to the SQLite record store
        #[arg(long)]
        save: bool,
    },
    /// Run one backtest per parameter combination
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated stop ATR scales, e.g. 0.05,0.1
        #[arg(long)]
        stop_atr_scales: Option<String>,
        /// Comma-separated top-N values
        #[arg(long)]
        top_n: Option<String>,
        /// Comma-separated sides: long, short, both
        #[arg(long)]
        sides: Option<String>,
        /// Comma-separated RVOL minimums
        #[arg(long)]
        rvol_mins: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rank one day's opening ranges without trading
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Run one day against the paper broker
    Paper {
        #[arg(short, long)]
        config: PathBuf,
        /// Day to replay; with --realtime defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Follow the wall clock and poll the data source for new bars
        #[arg(long)]
        realtime: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            save,
        } => run_backtest_command(&config, output.as_deref(), save),
        Command::Sweep {
            config,
            stop_atr_scales,
            top_n,
            sides,
            rvol_mins,
            output,
        } => run_sweep_command(
            &config,
            SweepAxes {
                stop_atr_scales,
                top_n,
                sides,
                rvol_mins,
            },
            output.as_deref(),
        ),
        Command::Scan { config, date } => run_scan(&config, date),
        Command::Paper {
            config,
            date,
            realtime,
            output,
        } => run_paper(&config, date, realtime, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: &OrbError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Market data source named by `[data] source`: `csv` (default) or `sqlite`.
pub fn open_data_port(config: &dyn ConfigPort) -> Result<Arc<dyn MarketDataPort>, OrbError> {
    let source = non_empty(config, "data", "source").unwrap_or_else(|| "csv".to_string());
    match source.to_lowercase().as_str() {
        "csv" => {
            let dir = non_empty(config, "data", "csv_dir")
                .ok_or_else(|| OrbError::config_missing("data", "csv_dir"))?;
            Ok(Arc::new(CsvAdapter::new(PathBuf::from(dir))))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            let adapter = SqliteAdapter::from_config(config)?;
            adapter.initialize_schema()?;
            Ok(Arc::new(adapter))
        }
        other => Err(OrbError::config_invalid(
            "data",
            "source",
            format!("unsupported data source '{other}'"),
        )),
    }
}

/// SQLite when `[sqlite] path` is set, in-memory otherwise.
pub fn open_record_store(config: &dyn ConfigPort) -> Result<Arc<dyn RecordStore>, OrbError> {
    #[cfg(feature = "sqlite")]
    if non_empty(config, "sqlite", "path").is_some() {
        use crate::adapters::sqlite_adapter::SqliteAdapter;
        let adapter = SqliteAdapter::from_config(config)?;
        adapter.initialize_schema()?;
        return Ok(Arc::new(adapter));
    }
    #[cfg(not(feature = "sqlite"))]
    let _ = config;
    Ok(Arc::new(MemoryStore::new()))
}

fn print_metrics(metrics: &Metrics) {
    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Total P&L:        {:.2}", metrics.total_pnl);
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", metrics.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);
    eprintln!("Commission:       {:.2}", metrics.total_commission);
    eprintln!(
        "Exits:            {} stop, {} target, {} forced",
        metrics.stopped, metrics.target_hits, metrics.forced_exits
    );
    if metrics.capped_trades > 0 {
        eprintln!("Capped Trades:    {}", metrics.capped_trades);
    }
}

fn write_json(path: &Path, json: &str) -> Result<(), OrbError> {
    fs::write(path, json)?;
    eprintln!("\nResults written to: {}", path.display());
    Ok(())
}

fn load_backtest_inputs(
    config_path: &Path,
) -> Result<(FileConfigAdapter, StrategyParams, BacktestConfig), ExitCode> {
    let adapter = load_config(config_path)?;
    let params = build_strategy_params(&adapter).map_err(|e| fail(&e))?;
    let bt_config = build_backtest_config(&adapter).map_err(|e| fail(&e))?;
    Ok((adapter, params, bt_config))
}

fn run_backtest_command(config_path: &Path, output_path: Option<&Path>, save: bool) -> ExitCode {
    let (adapter, params, bt_config) = match load_backtest_inputs(config_path) {
        Ok(inputs) => inputs,
        Err(code) => return code,
    };

    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    eprintln!(
        "Loading trading days {} to {}...",
        bt_config.start_date, bt_config.end_date
    );
    let days = match load_trading_days(data_port.as_ref(), &params, bt_config.start_date, bt_config.end_date) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    eprintln!("Loaded {} trading days", days.len());

    let run = run_backtest(&days, &params, &bt_config);
    print_metrics(&run.metrics());
    print_symbol_breakdown(&run);
    if !run.errors.is_empty() {
        eprintln!("\n{} symbol errors recorded", run.errors.len());
    }

    if let Some(path) = output_path {
        let written = run.to_json().and_then(|json| write_json(path, &json));
        if let Err(e) = written {
            return fail(&e);
        }
    }

    if save {
        if non_empty(&adapter, "sqlite", "path").is_none() {
            return fail(&OrbError::config_missing("sqlite", "path"));
        }
        let saved = open_record_store(&adapter).and_then(|store| store.append_run(&run));
        match saved {
            Ok(id) => eprintln!("Run saved with id {id}"),
            Err(e) => return fail(&e),
        }
    }

    ExitCode::SUCCESS
}

fn print_symbol_breakdown(run: &BacktestRun) {
    let mut by_symbol: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for trade in &run.trades {
        let entry = by_symbol.entry(trade.symbol.as_str()).or_default();
        entry.0 += 1;
        entry.1 += trade.pnl;
    }
    if by_symbol.is_empty() {
        return;
    }
    eprintln!("\n=== Per-Symbol Summary ===");
    for (symbol, (trades, pnl)) in by_symbol {
        let sign = if pnl >= 0.0 { "+" } else { "" };
        eprintln!("  {symbol}:  {trades} trades, {sign}${pnl:.0}");
    }
}

struct SweepAxes {
    stop_atr_scales: Option<String>,
    top_n: Option<String>,
    sides: Option<String>,
    rvol_mins: Option<String>,
}

fn parse_axis<T>(value: Option<&str>, key: &str) -> Result<Vec<T>, OrbError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(Vec::new()),
        Some(v) => parse_list(v).map_err(|reason| OrbError::config_invalid("sweep", key, reason)),
    }
}

fn build_grid(axes: &SweepAxes) -> Result<ParameterGrid, OrbError> {
    Ok(ParameterGrid {
        stop_atr_scales: parse_axis(axes.stop_atr_scales.as_deref(), "stop_atr_scales")?,
        top_ns: parse_axis(axes.top_n.as_deref(), "top_n")?,
        sides: parse_axis::<SideFilter>(axes.sides.as_deref(), "sides")?,
        rvol_mins: parse_axis(axes.rvol_mins.as_deref(), "rvol_mins")?,
    })
}

fn run_sweep_command(config_path: &Path, axes: SweepAxes, output_path: Option<&Path>) -> ExitCode {
    let (adapter, params, bt_config) = match load_backtest_inputs(config_path) {
        Ok(inputs) => inputs,
        Err(code) => return code,
    };
    let grid = match build_grid(&axes) {
        Ok(g) => g,
        Err(e) => return fail(&e),
    };
    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let days = match load_trading_days(data_port.as_ref(), &params, bt_config.start_date, bt_config.end_date) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    eprintln!(
        "Sweeping {} parameter combinations over {} days...",
        grid.points(&params).len(),
        days.len()
    );
    let results = run_sweep(&days, &params, &bt_config, &grid);

    println!("stop_atr_scale\ttop_n\tside\trvol_min\ttrades\ttotal_pnl\tsharpe\tmax_drawdown\tfinal_equity");
    for r in &results {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{:.2}\t{:.2}\t{:.4}\t{:.2}",
            r.point.stop_atr_scale,
            r.point.top_n,
            r.point.side,
            r.point.rvol_min,
            r.metrics.total_trades,
            r.metrics.total_pnl,
            r.metrics.sharpe_ratio,
            r.metrics.max_drawdown,
            r.final_equity
        );
    }

    if let Some(path) = output_path {
        let written = serde_json::to_string_pretty(&results)
            .map_err(OrbError::from)
            .and_then(|json| write_json(path, &json));
        if let Err(e) = written {
            return fail(&e);
        }
    }
    ExitCode::SUCCESS
}

fn run_scan(config_path: &Path, date: NaiveDate) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let params = match build_strategy_params(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let live = match build_live_config(&adapter) {
        Ok(l) => l,
        Err(e) => return fail(&e),
    };
    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let metrics = match data_port.daily_metrics(date) {
        Ok(m) => m,
        Err(e) => return fail(&e),
    };

    let mut bars = BTreeMap::new();
    for member in select_universe(&params.universe, &metrics).members {
        match data_port.intraday_bars(&member.symbol, date) {
            Ok(b) => {
                bars.insert(member.symbol.clone(), b);
            }
            Err(e) => eprintln!("  {}: {e}", member.symbol),
        }
    }

    let mut scan = scan_day(&params, date, &metrics, &bars);
    eprintln!(
        "Universe: {} of {} symbols",
        scan.universe.count(),
        metrics.len()
    );
    for candidate in scan.board.candidates() {
        if let Some(rejection) = &candidate.rejection {
            eprintln!("  {} skipped: {rejection}", candidate.symbol());
        }
    }

    let window_end = params.calendar.window_end_at(date);
    println!("rank\tsymbol\tside\trvol\tentry\tstop\ttarget\tshares\tstatus");
    for plan in scan.take_entries(&params) {
        let (signal, _) = arm_signal(plan, live.equity, &params.risk, window_end);
        let plan = signal.plan();
        println!(
            "{}\t{}\t{}\t{:.2}\t{:.4}\t{:.4}\t{}\t{}\t{}",
            plan.rank,
            plan.symbol,
            plan.side,
            plan.rvol,
            plan.entry_price,
            plan.stop_price,
            plan.target_price.map(|t| format!("{t:.4}")).unwrap_or_else(|| "-".into()),
            signal.quantity().unwrap_or(0),
            signal.status()
        );
    }
    for e in &scan.errors {
        eprintln!("  {} ({:?}): {}", e.symbol, e.stage, e.reason);
    }
    ExitCode::SUCCESS
}

fn run_paper(
    config_path: &Path,
    date: Option<NaiveDate>,
    realtime: bool,
    output_path: Option<&Path>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let session = match (realtime, date) {
        (true, date) => realtime_session(&adapter, date),
        (false, Some(date)) => paper_session(&adapter, date),
        (false, None) => Err(OrbError::config_invalid(
            "paper",
            "date",
            "--date is required unless --realtime is set",
        )),
    };
    let report = match session {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let date = report.date.map(|d| d.to_string()).unwrap_or_default();

    eprintln!("\n=== Paper Session {date} ===");
    eprintln!("Universe:         {}", report.universe_size);
    eprintln!("Signals:          {}", report.signals.len());
    eprintln!("Trades:           {}", report.trades.len());
    eprintln!("P&L:              {:.2}", report.pnl());
    for trade in &report.trades {
        eprintln!(
            "  {} {} {} @ {:.4} -> {:.4} ({}) {:+.2}",
            trade.symbol,
            trade.side,
            trade.quantity,
            trade.entry_price,
            trade.exit_price,
            trade.exit_reason,
            trade.pnl
        );
    }
    if !report.errors.is_empty() {
        eprintln!("{} symbol errors recorded", report.errors.len());
    }

    if let Some(path) = output_path {
        let written = serde_json::to_string_pretty(&report)
            .map_err(OrbError::from)
            .and_then(|json| write_json(path, &json));
        if let Err(e) = written {
            return fail(&e);
        }
    }
    ExitCode::SUCCESS
}

/// Load today's bars for every universe member into the paper broker.
/// Symbols without bars yet are skipped; they are picked up on a later call.
fn feed_paper_bars(
    params: &StrategyParams,
    data_port: &dyn MarketDataPort,
    gateway: &PaperGateway,
    date: NaiveDate,
) -> usize {
    let Ok(metrics) = data_port.daily_metrics(date) else {
        return 0;
    };
    let mut loaded = 0;
    for member in select_universe(&params.universe, &metrics).members {
        if let Ok(bars) = data_port.intraday_bars(&member.symbol, date) {
            gateway.load_bars(&member.symbol, bars);
            loaded += 1;
        }
    }
    loaded
}

struct SessionParts {
    params: StrategyParams,
    live: LiveConfig,
    costs: ExecutionCosts,
    data_port: Arc<dyn MarketDataPort>,
    store: Arc<dyn RecordStore>,
}

fn session_parts(config: &dyn ConfigPort) -> Result<SessionParts, OrbError> {
    Ok(SessionParts {
        params: build_strategy_params(config)?,
        live: build_live_config(config)?,
        costs: build_costs(config)?,
        data_port: open_data_port(config)?,
        store: open_record_store(config)?,
    })
}

/// Run `date` through the paper broker on `clock`. With `bar_poll` set, the
/// broker's bars are reloaded from the data source at that interval.
fn drive_session(
    parts: SessionParts,
    date: NaiveDate,
    clock: Arc<dyn Clock>,
    bar_poll: Option<std::time::Duration>,
) -> Result<SessionReport, OrbError> {
    let SessionParts {
        params,
        live,
        costs,
        data_port,
        store,
    } = parts;

    let gateway = Arc::new(PaperGateway::new(clock.clone(), costs.slippage_pct));
    feed_paper_bars(&params, data_port.as_ref(), &gateway, date);

    let kill_switch = KillSwitch::new();
    let manager = Arc::new(OrderManager::new(
        gateway.clone(),
        store,
        clock.clone(),
        kill_switch.clone(),
        live.retry.clone(),
        costs,
        params.calendar.clone(),
    ));
    let feed_params = params.clone();
    let feed_port = data_port.clone();
    let session = LiveSession::new(params, live, data_port, manager, clock);

    let runtime = tokio::runtime::Runtime::new()?;
    Ok(runtime.block_on(async {
        let interrupt = engage_on_ctrl_c(kill_switch);
        let feed = bar_poll.map(|every| {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    let loaded = feed_paper_bars(&feed_params, feed_port.as_ref(), &gateway, date);
                    debug!(loaded, "paper bars refreshed");
                }
            })
        });
        let report = session.run_day(date).await;
        interrupt.abort();
        if let Some(feed) = feed {
            feed.abort();
        }
        report
    }))
}

/// Replay `date` from archived bars through the paper broker on a manual clock.
pub fn paper_session(config: &dyn ConfigPort, date: NaiveDate) -> Result<SessionReport, OrbError> {
    let parts = session_parts(config)?;
    let calendar = &parts.params.calendar;
    let start = calendar.at(date, calendar.open) - parts.live.refresh_lead;
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start));
    drive_session(parts, date, clock, None)
}

/// Trade today's session on the wall clock, shifted by `[session]
/// utc_offset_minutes`. Bars are re-read from the data source every poll
/// interval, so the source is expected to be filled while the session runs.
pub fn realtime_session(config: &dyn ConfigPort, date: Option<NaiveDate>) -> Result<SessionReport, OrbError> {
    let parts = session_parts(config)?;
    let clock = SystemClock::new(parts.params.calendar.utc_offset_minutes);
    let today = clock.now().date();
    let date = date.unwrap_or(today);
    if date != today {
        return Err(OrbError::config_invalid(
            "paper",
            "date",
            format!("realtime sessions run today ({today}), not {date}"),
        ));
    }
    let poll = parts
        .live
        .poll_interval
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60));
    info!(%date, utc_offset_minutes = parts.params.calendar.utc_offset_minutes, "starting realtime paper session");
    drive_session(parts, date, Arc::new(clock), Some(poll))
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    for section in adapter.unknown_sections() {
        eprintln!("warning: section [{section}] is not used");
    }

    let params = match build_strategy_params(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    eprintln!("\nStrategy:");
    eprintln!(
        "  universe:  price >= {}, atr >= {}, volume >= {}, {} listed symbols",
        params.universe.min_price,
        params.universe.min_atr,
        params.universe.min_volume,
        params.universe.symbols.len()
    );
    eprintln!(
        "  ranking:   top {} {} with rvol >= {}",
        params.ranking.top_n, params.ranking.side, params.ranking.rvol_min
    );
    eprintln!(
        "  session:   {}-{}, window {} min, cutoff {}, forced exit {}",
        params.calendar.open,
        params.calendar.close,
        params.calendar.or_window_minutes,
        params.calendar.entry_cutoff,
        params.calendar.forced_exit
    );
    eprintln!(
        "  risk:      {}% per trade, leverage {}",
        params.risk.risk_pct * 100.0,
        params.risk.leverage
    );

    if let Err(e) = build_live_config(&adapter) {
        return fail(&e);
    }

    if non_empty(&adapter, "backtest", "start_date").is_some() {
        match build_backtest_config(&adapter) {
            Ok(bt) => eprintln!(
                "  backtest:  {} to {}, capital {}",
                bt.start_date, bt.end_date, bt.initial_capital
            ),
            Err(e) => return fail(&e),
        }
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
