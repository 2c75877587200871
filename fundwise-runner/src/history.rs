//! Markdown history report: run overview, health, and recent ledger rows.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt::Write;

use fundwise_core::domain::{derive_run_status, EffectiveStatus, JobRecord, RunStatus};
use fundwise_core::store::{JobLedger, StoreError};

use crate::health::HealthReport;
use crate::reporting::markdown::{escape_cell, NA};

/// Derived status of one run date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOverview {
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub succeeded: usize,
    pub failed: usize,
}

/// Overview for every run date appearing in `records`, newest first. Each
/// status is derived from all of that date's ledger rows, not just the ones
/// in `records`.
pub fn run_overviews(ledger: &JobLedger, records: &[JobRecord]) -> Result<Vec<RunOverview>, StoreError> {
    let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.run_date).collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();

    dates
        .into_iter()
        .map(|run_date| {
            let outcome = derive_run_status(&ledger.run_records(run_date)?);
            Ok(RunOverview {
                run_date,
                status: outcome.status,
                succeeded: outcome.succeeded.len(),
                failed: outcome.failed.len(),
            })
        })
        .collect()
}

fn ts(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| NA.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn status_label(record: &JobRecord, now: DateTime<Utc>, grace: Duration) -> String {
    match record.effective_status(now, grace) {
        EffectiveStatus::InFlight => "started (in flight)".into(),
        EffectiveStatus::Abandoned => "started (abandoned)".into(),
        _ => record.status.to_string(),
    }
}

pub fn render_history_markdown(
    records: &[JobRecord],
    runs: &[RunOverview],
    health: Option<&HealthReport>,
    now: DateTime<Utc>,
    abandoned_grace: Duration,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Pipeline history\n");
    let _ = writeln!(out, "Generated at {}\n", now.format("%Y-%m-%d %H:%M:%S UTC"));

    let _ = writeln!(out, "## Runs\n");
    if runs.is_empty() {
        let _ = writeln!(out, "No runs recorded.");
    } else {
        let _ = writeln!(out, "| Run date | Status | Succeeded | Failed |");
        let _ = writeln!(out, "|---|---|---|---|");
        for run in runs {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                run.run_date,
                run.status.as_str(),
                run.succeeded,
                run.failed
            );
        }
    }

    if let Some(health) = health {
        let _ = writeln!(out, "\n## Health\n");
        let verdict = if health.is_healthy() { "healthy" } else { "unhealthy" };
        let _ = writeln!(
            out,
            "Overall: **{verdict}** (max delay {}h)\n",
            health.max_delay_hours
        );
        let _ = writeln!(out, "| Symbol | State | Last success | Hours since |");
        let _ = writeln!(out, "|---|---|---|---|");
        for s in &health.symbols {
            let hours = s
                .hours_since_success
                .map_or_else(|| NA.to_string(), |h| format!("{h:.1}"));
            let _ = writeln!(
                out,
                "| {} | {} | {} | {hours} |",
                s.symbol_id,
                s.state.as_str(),
                ts(s.last_success_at)
            );
        }
        if !health.abandoned.is_empty() {
            let _ = writeln!(out, "\n{} abandoned job(s) detected.", health.abandoned.len());
        }
    }

    let _ = writeln!(out, "\n## Jobs\n");
    if records.is_empty() {
        let _ = writeln!(out, "No jobs match.");
        return out;
    }
    let _ = writeln!(
        out,
        "| Job | Run date | Symbol | Stage | Status | Started | Finished | Error |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
    for r in records {
        let error = r.error_detail.as_deref().map_or_else(|| NA.to_string(), escape_cell);
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {error} |",
            r.job_id,
            r.run_date,
            escape_cell(&r.symbol_id),
            r.stage,
            status_label(r, now, abandoned_grace),
            ts(Some(r.started_at)),
            ts(r.finished_at),
        );
    }
    out
}
