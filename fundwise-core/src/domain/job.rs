//! Job ledger domain types: stages, statuses, records, and derived run status.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One step of the per-symbol pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Normalize,
    Compute,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Fetch, Stage::Normalize, Stage::Compute, Stage::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Compute => "compute",
            Stage::Report => "report",
        }
    }

    /// Stages that run after this one.
    pub fn remaining(&self) -> &'static [Stage] {
        let idx = Stage::ALL.iter().position(|s| s == self).unwrap_or(0);
        &Stage::ALL[idx + 1..]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Stage::Fetch),
            "normalize" => Ok(Stage::Normalize),
            "compute" => Ok(Stage::Compute),
            "report" => Ok(Stage::Report),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Status of a ledger row. `Started` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Started)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(JobStatus::Started),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// How a reader should interpret a row once abandoned `started` rows are
/// taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Success,
    Failed,
    Skipped,
    /// `started`, still within the grace period.
    InFlight,
    /// `started`, older than the grace period; counts as failed.
    Abandoned,
}

/// One row of the job ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: i64,
    pub run_date: NaiveDate,
    pub symbol_id: String,
    pub stage: Stage,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl JobRecord {
    pub fn effective_status(&self, now: DateTime<Utc>, grace: Duration) -> EffectiveStatus {
        match self.status {
            JobStatus::Success => EffectiveStatus::Success,
            JobStatus::Failed => EffectiveStatus::Failed,
            JobStatus::Skipped => EffectiveStatus::Skipped,
            JobStatus::Started if now - self.started_at > grace => EffectiveStatus::Abandoned,
            JobStatus::Started => EffectiveStatus::InFlight,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|f| f - self.started_at)
    }
}

/// Aggregate outcome of a pipeline run. Always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    AllSuccess,
    PartialFailure,
    TotalFailure,
}

impl RunStatus {
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => RunStatus::TotalFailure,
            (_, 0) => RunStatus::AllSuccess,
            _ => RunStatus::PartialFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::AllSuccess => "all_success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::TotalFailure => "total_failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-symbol outcome of one run date as seen in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Derive a run's aggregate status from its ledger rows.
///
/// For each symbol the latest attempt decides: the symbol succeeded iff its
/// most recent row (highest job id) is a successful `report`. Retries after a
/// failure therefore count, and a failure after an earlier success counts too.
pub fn derive_run_status(records: &[JobRecord]) -> RunOutcome {
    let mut latest: BTreeMap<&str, &JobRecord> = BTreeMap::new();
    for record in records {
        let entry = latest.entry(record.symbol_id.as_str()).or_insert(record);
        if record.job_id > entry.job_id {
            *entry = record;
        }
    }

    let (mut succeeded, mut failed) = (Vec::new(), Vec::new());
    for (symbol, record) in latest {
        if record.stage == Stage::Report && record.status == JobStatus::Success {
            succeeded.push(symbol.to_string());
        } else {
            failed.push(symbol.to_string());
        }
    }

    RunOutcome {
        status: RunStatus::from_counts(succeeded.len(), failed.len()),
        succeeded,
        failed,
    }
}
