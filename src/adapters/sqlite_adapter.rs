//! SQLite adapter: market data source and append-only record store.

use crate::domain::backtest::BacktestRun;
use crate::domain::daily_metrics::DailyMetrics;
use crate::domain::error::OrbError;
use crate::domain::ohlcv::IntradayBar;
use crate::domain::position::TradeRecord;
use crate::domain::signal::SignalRecord;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataPort;
use crate::ports::store_port::RecordStore;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::debug;

const DATE_FMT: &str = "%Y-%m-%d";
const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> OrbError {
    OrbError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> OrbError {
    OrbError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn conversion_err(len: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(len, rusqlite::types::Type::Text, Box::new(e))
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, OrbError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| OrbError::config_missing("sqlite", "path"))?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, OrbError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, OrbError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), OrbError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS daily_metrics (
                symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                close REAL,
                atr_14 REAL,
                avg_volume_14 REAL,
                prev_close REAL,
                avg_or_volume_14 REAL,
                score REAL,
                PRIMARY KEY (symbol, trade_date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_metrics_date ON daily_metrics(trade_date);

            CREATE TABLE IF NOT EXISTS intraday_bars (
                symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                ts TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, ts)
            );
            CREATE INDEX IF NOT EXISTS idx_intraday_bars_day ON intraday_bars(symbol, trade_date);

            CREATE TABLE IF NOT EXISTS signal_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_date TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signal_records_date ON signal_records(trade_date);

            CREATE TABLE IF NOT EXISTS trade_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_date TEXT NOT NULL,
                symbol TEXT NOT NULL,
                pnl REAL NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trade_records_date ON trade_records(trade_date);

            CREATE TABLE IF NOT EXISTS backtest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                trades INTEGER NOT NULL,
                final_equity REAL NOT NULL,
                run TEXT NOT NULL
            );",
        )
        .map_err(query_err)?;

        Ok(())
    }

    pub fn insert_metrics(&self, metrics: &[DailyMetrics]) -> Result<(), OrbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for m in metrics {
            tx.execute(
                "INSERT OR REPLACE INTO daily_metrics
                 (symbol, trade_date, close, atr_14, avg_volume_14, prev_close, avg_or_volume_14, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    m.symbol,
                    m.trade_date.format(DATE_FMT).to_string(),
                    m.close,
                    m.atr_14,
                    m.avg_volume_14,
                    m.prev_close,
                    m.avg_or_volume_14,
                    m.score
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    pub fn insert_bars(&self, bars: &[IntradayBar]) -> Result<(), OrbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO intraday_bars
                 (symbol, trade_date, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.symbol,
                    bar.date().format(DATE_FMT).to_string(),
                    bar.timestamp.format(TS_FMT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    /// Stored runs as `(id, run)`, oldest first.
    pub fn runs(&self) -> Result<Vec<(i64, BacktestRun)>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, run FROM backtest_runs ORDER BY id ASC")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(query_err)?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, json) = row.map_err(query_err)?;
            runs.push((id, serde_json::from_str(&json)?));
        }
        Ok(runs)
    }

    fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        date: NaiveDate,
    ) -> Result<Vec<T>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(query).map_err(query_err)?;
        let rows = stmt
            .query_map(params![date.format(DATE_FMT).to_string()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(query_err)?;

        let mut out = Vec::new();
        for row in rows {
            let json = row.map_err(query_err)?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }
}

impl MarketDataPort for SqliteAdapter {
    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT trade_date FROM daily_metrics
                 WHERE trade_date >= ?1 AND trade_date <= ?2
                 ORDER BY trade_date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    start.format(DATE_FMT).to_string(),
                    end.format(DATE_FMT).to_string()
                ],
                |row| {
                    let s: String = row.get(0)?;
                    NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| conversion_err(s.len(), e))
                },
            )
            .map_err(query_err)?;

        let mut dates = Vec::new();
        for row in rows {
            dates.push(row.map_err(query_err)?);
        }
        Ok(dates)
    }

    fn daily_metrics(&self, date: NaiveDate) -> Result<Vec<DailyMetrics>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, close, atr_14, avg_volume_14, prev_close, avg_or_volume_14, score
                 FROM daily_metrics WHERE trade_date = ?1 ORDER BY symbol ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![date.format(DATE_FMT).to_string()], |row| {
                Ok(DailyMetrics {
                    symbol: row.get(0)?,
                    trade_date: date,
                    close: row.get(1)?,
                    atr_14: row.get(2)?,
                    avg_volume_14: row.get(3)?,
                    prev_close: row.get(4)?,
                    avg_or_volume_14: row.get(5)?,
                    score: row.get(6)?,
                })
            })
            .map_err(query_err)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row.map_err(query_err)?);
        }
        Ok(metrics)
    }

    fn intraday_bars(&self, symbol: &str, date: NaiveDate) -> Result<Vec<IntradayBar>, OrbError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume FROM intraday_bars
                 WHERE symbol = ?1 AND trade_date = ?2 ORDER BY ts ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![symbol, date.format(DATE_FMT).to_string()],
                |row| {
                    let ts: String = row.get(0)?;
                    let timestamp = NaiveDateTime::parse_from_str(&ts, TS_FMT)
                        .map_err(|e| conversion_err(ts.len(), e))?;
                    Ok(IntradayBar {
                        symbol: symbol.to_string(),
                        timestamp,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }
        if bars.is_empty() {
            return Err(OrbError::NoData {
                what: format!("bars for {symbol} on {date}"),
            });
        }
        Ok(bars)
    }
}

impl RecordStore for SqliteAdapter {
    fn append_signal(&self, record: &SignalRecord) -> Result<(), OrbError> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO signal_records (trade_date, symbol, status, updated_at, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.trade_date.format(DATE_FMT).to_string(),
                record.symbol,
                record.status.as_str(),
                record
                    .updated_at
                    .map(|t| t.format(TS_FMT).to_string())
                    .unwrap_or_default(),
                json
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn append_trade(&self, trade: &TradeRecord) -> Result<(), OrbError> {
        let json = serde_json::to_string(trade)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trade_records (trade_date, symbol, pnl, record) VALUES (?1, ?2, ?3, ?4)",
            params![
                trade.trade_date.format(DATE_FMT).to_string(),
                trade.symbol,
                trade.pnl,
                json
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn append_run(&self, run: &BacktestRun) -> Result<i64, OrbError> {
        let json = serde_json::to_string(run)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backtest_runs (start_date, end_date, trades, final_equity, run)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.parameters.start_date.format(DATE_FMT).to_string(),
                run.parameters.end_date.format(DATE_FMT).to_string(),
                run.trades.len() as i64,
                run.final_equity(),
                json
            ],
        )
        .map_err(query_err)?;
        let id = conn.last_insert_rowid();
        debug!(id, "backtest run stored");
        Ok(id)
    }

    fn signals_for(&self, date: NaiveDate) -> Result<Vec<SignalRecord>, OrbError> {
        self.load_json(
            "SELECT record FROM signal_records WHERE trade_date = ?1 ORDER BY id ASC",
            date,
        )
    }

    fn trades_for(&self, date: NaiveDate) -> Result<Vec<TradeRecord>, OrbError> {
        self.load_json(
            "SELECT record FROM trade_records WHERE trade_date = ?1 ORDER BY id ASC",
            date,
        )
    }
}
