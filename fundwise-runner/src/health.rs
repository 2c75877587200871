//! Read-only health check over the job ledger.
//!
//! For each active symbol: hours since the last successful `report` stage.
//! Older than the threshold, or never succeeded, is unhealthy. Abandoned
//! `started` rows are listed for the operator but do not change a symbol's
//! state on their own. No active symbols at all is reported as unhealthy.
//! Nothing here writes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt::Write;
use thiserror::Error;

use fundwise_core::domain::{EffectiveStatus, JobRecord, Stage};
use fundwise_core::store::{JobLedger, StoreError, SymbolRegistry};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("max_delay_hours must be positive, got {0}")]
    InvalidThreshold(f64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolHealthState {
    Healthy,
    Stale,
    NeverSucceeded,
}

impl SymbolHealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolHealthState::Healthy => "healthy",
            SymbolHealthState::Stale => "stale",
            SymbolHealthState::NeverSucceeded => "never_succeeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolHealth {
    pub symbol_id: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub hours_since_success: Option<f64>,
    pub state: SymbolHealthState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub max_delay_hours: f64,
    pub symbols: Vec<SymbolHealth>,
    /// `started` rows older than the grace period.
    pub abandoned: Vec<JobRecord>,
}

impl HealthReport {
    /// An empty watchlist has nothing to vouch for, so it is not healthy.
    pub fn is_healthy(&self) -> bool {
        !self.symbols.is_empty()
            && self
                .symbols
                .iter()
                .all(|s| s.state == SymbolHealthState::Healthy)
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &SymbolHealth> {
        self.symbols
            .iter()
            .filter(|s| s.state != SymbolHealthState::Healthy)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_healthy() {
            0
        } else {
            2
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Health check at {} (max delay {}h)",
            self.checked_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.max_delay_hours
        );
        if self.symbols.is_empty() {
            let _ = writeln!(out, "No active symbols registered.");
        }
        for s in &self.symbols {
            let last = s
                .last_success_at
                .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
            let hours = s
                .hours_since_success
                .map_or_else(|| "-".to_string(), |h| format!("{h:.1}h"));
            let _ = writeln!(
                out,
                "  {:<12} {:<16} last success {:<16} ({hours} ago)",
                s.symbol_id,
                s.state.as_str(),
                last
            );
        }
        if !self.abandoned.is_empty() {
            let _ = writeln!(out, "Abandoned jobs:");
            for job in &self.abandoned {
                let _ = writeln!(
                    out,
                    "  #{} {} {} {} started {}",
                    job.job_id,
                    job.run_date,
                    job.symbol_id,
                    job.stage,
                    job.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        let verdict = if self.is_healthy() { "HEALTHY" } else { "UNHEALTHY" };
        let _ = writeln!(out, "Status: {verdict}");
        out
    }
}

/// Evaluate every active symbol against `max_delay_hours` as of `now`.
pub fn evaluate(
    registry: &SymbolRegistry,
    ledger: &JobLedger,
    max_delay_hours: f64,
    abandoned_grace: Duration,
    now: DateTime<Utc>,
) -> Result<HealthReport, HealthError> {
    if max_delay_hours.is_nan() || max_delay_hours <= 0.0 {
        return Err(HealthError::InvalidThreshold(max_delay_hours));
    }

    let mut symbols = Vec::new();
    for symbol in registry.list_active()? {
        let last = ledger.latest_success(&symbol.symbol_id, Stage::Report)?;
        let last_success_at = last.map(|r| r.finished_at.unwrap_or(r.started_at));
        let hours_since_success =
            last_success_at.map(|t| (now - t).num_seconds() as f64 / 3600.0);
        let state = match hours_since_success {
            None => SymbolHealthState::NeverSucceeded,
            Some(h) if h > max_delay_hours => SymbolHealthState::Stale,
            Some(_) => SymbolHealthState::Healthy,
        };
        symbols.push(SymbolHealth {
            symbol_id: symbol.symbol_id,
            last_success_at,
            hours_since_success,
            state,
        });
    }

    let abandoned = ledger
        .open_jobs()?
        .into_iter()
        .filter(|j| j.effective_status(now, abandoned_grace) == EffectiveStatus::Abandoned)
        .collect();

    Ok(HealthReport {
        checked_at: now,
        max_delay_hours,
        symbols,
        abandoned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use fundwise_core::clock::{Clock, FixedClock};
    use fundwise_core::domain::{JobStatus, Market};
    use fundwise_core::store::Database;
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<FixedClock>,
        registry: SymbolRegistry,
        ledger: JobLedger,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 27, 8, 0, 0).unwrap()));
        let registry = SymbolRegistry::new(db.clone(), clock.clone());
        let ledger = JobLedger::new(db, clock.clone());
        registry.register("600519.SH", Market::Cn, "CNY").unwrap();
        registry.register("00700.HK", Market::Hk, "HKD").unwrap();
        Fixture { clock, registry, ledger }
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()
    }

    #[test]
    fn never_succeeded_is_unhealthy() {
        let f = fixture();
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert!(!report.is_healthy());
        assert_eq!(report.exit_code(), 2);
        assert!(report
            .symbols
            .iter()
            .all(|s| s.state == SymbolHealthState::NeverSucceeded));
    }

    #[test]
    fn empty_registry_and_ledger_is_unhealthy() {
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 27, 8, 0, 0).unwrap()));
        let registry = SymbolRegistry::new(db.clone(), clock.clone());
        let ledger = JobLedger::new(db, clock.clone());

        let report = evaluate(&registry, &ledger, 36.0, Duration::hours(6), clock.now()).unwrap();
        assert!(report.symbols.is_empty());
        assert!(!report.is_healthy());
        assert_eq!(report.exit_code(), 2);
        let text = report.render_text();
        assert!(text.contains("No active symbols registered."));
        assert!(text.contains("Status: UNHEALTHY"));
    }

    #[test]
    fn all_symbols_deactivated_is_unhealthy() {
        let f = fixture();
        for symbol in ["600519.SH", "00700.HK"] {
            f.ledger
                .record(run_date(), symbol, Stage::Report, JobStatus::Success, None)
                .unwrap();
            f.registry.deactivate(symbol).unwrap();
        }
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn recent_success_is_healthy_and_ages_into_stale() {
        let f = fixture();
        for symbol in ["600519.SH", "00700.HK"] {
            f.ledger
                .record(run_date(), symbol, Stage::Report, JobStatus::Success, None)
                .unwrap();
        }
        f.clock.advance(Duration::hours(10));
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.exit_code(), 0);

        f.clock.advance(Duration::hours(30));
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert_eq!(report.unhealthy().count(), 2);
        assert!(report.symbols.iter().all(|s| s.state == SymbolHealthState::Stale));
    }

    #[test]
    fn later_failures_do_not_hide_last_success() {
        let f = fixture();
        f.ledger
            .record(run_date(), "600519.SH", Stage::Report, JobStatus::Success, None)
            .unwrap();
        f.clock.advance(Duration::hours(2));
        f.ledger
            .record(run_date(), "600519.SH", Stage::Fetch, JobStatus::Failed, Some("x"))
            .unwrap();
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        let entry = report.symbols.iter().find(|s| s.symbol_id == "600519.SH").unwrap();
        assert_eq!(entry.state, SymbolHealthState::Healthy);
    }

    #[test]
    fn deactivated_symbols_are_not_checked() {
        let f = fixture();
        f.registry.deactivate("00700.HK").unwrap();
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert_eq!(report.symbols.len(), 1);
    }

    #[test]
    fn lists_abandoned_started_rows() {
        let f = fixture();
        f.ledger.start(run_date(), "600519.SH", Stage::Fetch).unwrap();
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert!(report.abandoned.is_empty());

        f.clock.advance(Duration::hours(7));
        let report = evaluate(&f.registry, &f.ledger, 36.0, Duration::hours(6), f.clock.now()).unwrap();
        assert_eq!(report.abandoned.len(), 1);
        assert!(report.render_text().contains("Abandoned jobs:"));
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let f = fixture();
        assert!(matches!(
            evaluate(&f.registry, &f.ledger, 0.0, Duration::hours(6), f.clock.now()),
            Err(HealthError::InvalidThreshold(_))
        ));
    }
}
