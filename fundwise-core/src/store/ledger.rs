//! Job ledger: append-only audit of every stage execution.
//!
//! One row per `(run_date, symbol_id, stage)` attempt. A row is inserted as
//! `started` and completed exactly once; reruns insert new rows. Deletes and
//! updates to completed rows are rejected by triggers in the schema, so the
//! audit trail survives even a misbehaving caller.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row, ToSql};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::db::{decode_date, decode_parsed, decode_ts, encode_date, encode_ts, Database};
use super::error::StoreError;
use crate::clock::Clock;
use crate::domain::{JobRecord, JobStatus, Stage};

/// Returned by [`JobLedger::start`]; identifies the row to complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: i64,
    pub run_date: NaiveDate,
    pub symbol_id: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
}

/// Filter for [`JobLedger::history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub run_date: Option<NaiveDate>,
    pub symbol_id: Option<String>,
    pub stage: Option<Stage>,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
    clock: Arc<dyn Clock>,
}

const SELECT_JOB: &str = "SELECT job_id, run_date, symbol_id, stage, status, started_at, \
                          finished_at, error_detail FROM data_jobs";

impl JobLedger {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert a `started` row and return its handle.
    pub fn start(
        &self,
        run_date: NaiveDate,
        symbol_id: &str,
        stage: Stage,
    ) -> Result<JobHandle, StoreError> {
        let started_at = self.clock.now();
        let job_id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO data_jobs (run_date, symbol_id, stage, status, started_at)
                 VALUES (?1, ?2, ?3, 'started', ?4)",
                params![encode_date(run_date), symbol_id, stage.as_str(), encode_ts(started_at)],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(job_id, %run_date, symbol = symbol_id, %stage, "job started");

        Ok(JobHandle {
            job_id,
            run_date,
            symbol_id: symbol_id.to_string(),
            stage,
            started_at,
        })
    }

    /// Write the terminal status for a started row. A second completion of
    /// the same handle fails with `DoubleCompletion`.
    pub fn complete(
        &self,
        handle: &JobHandle,
        status: JobStatus,
        error_detail: Option<&str>,
    ) -> Result<JobRecord, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidInput(
                "complete() requires a terminal status".into(),
            ));
        }
        let finished_at = self.clock.now();

        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE data_jobs SET status = ?2, finished_at = ?3, error_detail = ?4
                 WHERE job_id = ?1 AND status = 'started'",
                params![handle.job_id, status.as_str(), encode_ts(finished_at), error_detail],
            )?;
            if changed == 0 {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT status FROM data_jobs WHERE job_id = ?1",
                        [handle.job_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(match existing {
                    Some(s) => StoreError::DoubleCompletion {
                        job_id: handle.job_id,
                        status: s.parse().map_err(StoreError::Corrupt)?,
                    },
                    None => StoreError::JobNotFound(handle.job_id),
                });
            }
            Ok(())
        })?;
        debug!(job_id = handle.job_id, %status, "job completed");

        Ok(JobRecord {
            job_id: handle.job_id,
            run_date: handle.run_date,
            symbol_id: handle.symbol_id.clone(),
            stage: handle.stage,
            status,
            started_at: handle.started_at,
            finished_at: Some(finished_at),
            error_detail: error_detail.map(String::from),
        })
    }

    /// Insert an already-finished row, e.g. a `skipped` stage that never ran.
    pub fn record(
        &self,
        run_date: NaiveDate,
        symbol_id: &str,
        stage: Stage,
        status: JobStatus,
        error_detail: Option<&str>,
    ) -> Result<JobRecord, StoreError> {
        let handle = self.start(run_date, symbol_id, stage)?;
        self.complete(&handle, status, error_detail)
    }

    /// Matching rows, most recent first.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<JobRecord>, StoreError> {
        if query.limit == 0 {
            return Err(StoreError::InvalidInput("history limit must be > 0".into()));
        }

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(date) = query.run_date {
            clauses.push("run_date = ?");
            values.push(Box::new(encode_date(date)));
        }
        if let Some(symbol) = &query.symbol_id {
            clauses.push("symbol_id = ?");
            values.push(Box::new(symbol.clone()));
        }
        if let Some(stage) = query.stage {
            clauses.push("stage = ?");
            values.push(Box::new(stage.as_str()));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        values.push(Box::new(limit));
        let sql = format!("{SELECT_JOB} {filter} ORDER BY job_id DESC LIMIT ?");

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(params.as_slice(), job_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Most recent successful row for a symbol and stage.
    pub fn latest_success(
        &self,
        symbol_id: &str,
        stage: Stage,
    ) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!(
            "{SELECT_JOB} WHERE symbol_id = ?1 AND stage = ?2 AND status = 'success'
             ORDER BY job_id DESC LIMIT 1"
        );
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![symbol_id, stage.as_str()], job_from_row)
                .optional()?)
        })
    }

    /// All rows of one run date in insertion order.
    pub fn run_records(&self, run_date: NaiveDate) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!("{SELECT_JOB} WHERE run_date = ?1 ORDER BY job_id");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([encode_date(run_date)], job_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Distinct run dates, newest first.
    pub fn run_dates(&self, limit: usize) -> Result<Vec<NaiveDate>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT run_date FROM data_jobs ORDER BY run_date DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], |row| {
                let text: String = row.get(0)?;
                decode_date(&text, 0)
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Rows still marked `started`, oldest first.
    pub fn open_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!("{SELECT_JOB} WHERE status = 'started' ORDER BY job_id");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], job_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let run_date: String = row.get(1)?;
    let stage: String = row.get(3)?;
    let status: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    let finished_at: Option<String> = row.get(6)?;
    Ok(JobRecord {
        job_id: row.get(0)?,
        run_date: decode_date(&run_date, 1)?,
        symbol_id: row.get(2)?,
        stage: decode_parsed(&stage, 3)?,
        status: decode_parsed(&status, 4)?,
        started_at: decode_ts(&started_at, 5)?,
        finished_at: finished_at.as_deref().map(|t| decode_ts(t, 6)).transpose()?,
        error_detail: row.get(7)?,
    })
}
