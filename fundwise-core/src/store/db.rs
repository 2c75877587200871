//! SQLite connection handle and schema migrations.
//!
//! One connection behind a mutex gives single-writer discipline inside the
//! process; WAL mode lets other processes (e.g. a concurrent `health-check`)
//! read while a pipeline run writes.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::error::StoreError;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!(path = %path.display(), "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_symbols", CREATE_SYMBOLS_TABLE)?;
    run_migration(conn, "002_fx_rates", CREATE_FX_RATES_TABLE)?;
    run_migration(conn, "003_data_jobs", CREATE_DATA_JOBS_TABLE)?;
    run_migration(conn, "004_report_artifacts", CREATE_REPORT_ARTIFACTS_TABLE)?;
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        info!(migration = name, "running migration");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?1)", [name])?;
    }
    Ok(())
}

const CREATE_SYMBOLS_TABLE: &str = r#"
CREATE TABLE symbols (
    symbol_id TEXT PRIMARY KEY,
    market TEXT NOT NULL,
    currency TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_symbols_active ON symbols(active);
CREATE TRIGGER symbols_no_delete BEFORE DELETE ON symbols
BEGIN
    SELECT RAISE(ABORT, 'symbols are deactivated, never deleted');
END;
CREATE TRIGGER symbols_identity_immutable BEFORE UPDATE OF market, currency ON symbols
WHEN NEW.market <> OLD.market OR NEW.currency <> OLD.currency
BEGIN
    SELECT RAISE(ABORT, 'symbol market and currency are immutable');
END;
"#;

const CREATE_FX_RATES_TABLE: &str = r#"
CREATE TABLE fx_rates (
    date TEXT NOT NULL,
    base_currency TEXT NOT NULL,
    quote_currency TEXT NOT NULL,
    rate REAL NOT NULL CHECK (rate > 0),
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (date, base_currency, quote_currency)
);
CREATE INDEX idx_fx_rates_pair_date ON fx_rates(base_currency, quote_currency, date);
"#;

const CREATE_DATA_JOBS_TABLE: &str = r#"
CREATE TABLE data_jobs (
    job_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    symbol_id TEXT NOT NULL,
    stage TEXT NOT NULL CHECK (stage IN ('fetch', 'normalize', 'compute', 'report')),
    status TEXT NOT NULL CHECK (status IN ('started', 'success', 'failed', 'skipped')),
    started_at TEXT NOT NULL,
    finished_at TEXT,
    error_detail TEXT
);
CREATE INDEX idx_data_jobs_run_date ON data_jobs(run_date);
CREATE INDEX idx_data_jobs_symbol_stage_status ON data_jobs(symbol_id, stage, status);
CREATE TRIGGER data_jobs_no_delete BEFORE DELETE ON data_jobs
BEGIN
    SELECT RAISE(ABORT, 'data_jobs is append-only');
END;
CREATE TRIGGER data_jobs_completed_immutable BEFORE UPDATE ON data_jobs
WHEN OLD.status <> 'started'
BEGIN
    SELECT RAISE(ABORT, 'completed job rows are immutable');
END;
CREATE TRIGGER data_jobs_identity_immutable
BEFORE UPDATE OF job_id, run_date, symbol_id, stage, started_at ON data_jobs
BEGIN
    SELECT RAISE(ABORT, 'job identity columns are immutable');
END;
"#;

const CREATE_REPORT_ARTIFACTS_TABLE: &str = r#"
CREATE TABLE report_artifacts (
    artifact_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    symbol_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    checksum TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    UNIQUE (run_date, symbol_id, kind)
);
CREATE INDEX idx_report_artifacts_symbol ON report_artifacts(symbol_id, run_date);
"#;

// ── Column encoding helpers ─────────────────────────────────────────

pub(crate) fn encode_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

pub(crate) fn decode_date(text: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date '{text}': {e}")))
}

pub(crate) fn decode_ts(text: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{text}': {e}")))
}

pub(crate) fn decode_parsed<T>(text: &str, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    text.parse::<T>().map_err(|e| conversion_error(idx, e))
}
