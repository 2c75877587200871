//! Daily pipeline orchestrator.
//!
//! Per symbol, stages run in order `fetch → normalize → compute → report`,
//! each wrapped in a ledger start/complete pair. Failure policy:
//! 1. A failing stage is completed as `failed` with `"<Kind>: <message>"`.
//! 2. Every remaining stage for that symbol gets a `skipped` row.
//! 3. The orchestrator moves on to the next symbol.
//! 4. Ledger write failures and contract violations abort the run; nothing
//!    else does.
//!
//! The aggregate status is derived from the per-symbol outcomes after all
//! symbols finish. With `workers > 1`, symbols run on a rayon pool; the
//! ledger serializes its own writes.

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

use fundwise_core::data::DateRange;
use fundwise_core::domain::{parse_symbol, JobStatus, RunStatus, Stage, Symbol};
use fundwise_core::store::StoreError;

use crate::config::{ConfigError, PipelineConfig};
use crate::metrics::SymbolMetrics;
use crate::reporting::write_run_summary;
use crate::screening::{market_panel, rank_watchlist, MarketPanel, WatchlistScore};
use crate::services::Services;
use crate::stages::{StageRunner, SymbolWork};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("contract violation while processing {symbol_id}: {detail}")]
    Contract { symbol_id: String, detail: String },

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("no symbols to process")]
    NoSymbols,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_date: NaiveDate,
    pub range: DateRange,
    /// Explicit selection; `None` = every active registered symbol.
    pub symbols: Option<Vec<String>>,
    /// Stale data fails the normalize stage instead of warning.
    pub strict: bool,
}

impl RunRequest {
    /// Request covering `lookback_days` up to and including `run_date`.
    pub fn for_date(run_date: NaiveDate, lookback_days: i64) -> Self {
        Self {
            run_date,
            range: DateRange::new(run_date - Duration::days(lookback_days), run_date),
            symbols: None,
            strict: false,
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }
}

/// How one symbol's stage sequence ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolOutcome {
    pub symbol_id: String,
    pub succeeded: bool,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    /// Already written to the symbol's own `summary.json`.
    #[serde(skip)]
    pub metrics: Option<SymbolMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<SymbolOutcome>,
    /// Requested symbols that were not registered or could not be parsed.
    pub ignored: Vec<String>,
    /// Succeeded symbols, best score first.
    pub watchlist: Vec<WatchlistScore>,
    pub market_panel: Option<MarketPanel>,
    #[serde(skip)]
    pub summary_files: Vec<PathBuf>,
}

impl RunSummary {
    fn from_outcomes(run_date: NaiveDate, outcomes: Vec<SymbolOutcome>, ignored: Vec<String>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        let failed = outcomes.len() - succeeded;
        let scored: Vec<&SymbolMetrics> = outcomes
            .iter()
            .filter(|o| o.succeeded)
            .filter_map(|o| o.metrics.as_ref())
            .collect();
        let watchlist = rank_watchlist(scored.iter().copied());
        let market_panel = market_panel(&watchlist, &scored);
        Self {
            run_date,
            status: RunStatus::from_counts(succeeded, failed),
            succeeded,
            failed,
            outcomes,
            ignored,
            watchlist,
            market_panel,
            summary_files: Vec::new(),
        }
    }

    pub fn outcome(&self, symbol_id: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|o| o.symbol_id == symbol_id)
    }
}

/// Maps a run status to a process exit code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitPolicy {
    /// Accept `partial_failure` as success.
    pub allow_partial_success: bool,
}

impl ExitPolicy {
    pub fn exit_code(&self, status: RunStatus) -> i32 {
        match status {
            RunStatus::AllSuccess => 0,
            RunStatus::PartialFailure if self.allow_partial_success => 0,
            RunStatus::PartialFailure => 2,
            RunStatus::TotalFailure => 3,
        }
    }
}

/// Progress callbacks. May be invoked from worker threads.
pub trait PipelineProgress: Send + Sync {
    fn on_stage_complete(&self, _symbol_id: &str, _stage: Stage, _status: JobStatus) {}
    fn on_symbol_complete(&self, _outcome: &SymbolOutcome) {}
}

/// Discards all progress events.
pub struct NoProgress;

impl PipelineProgress for NoProgress {}

pub struct Pipeline {
    services: Services,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        Self { services, config }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(
        &self,
        request: &RunRequest,
        progress: &dyn PipelineProgress,
    ) -> Result<RunSummary, PipelineError> {
        if request.range.start > request.range.end {
            return Err(PipelineError::InvalidRange {
                start: request.range.start,
                end: request.range.end,
            });
        }

        let (symbols, ignored) = self.select_symbols(request)?;
        if symbols.is_empty() {
            return Err(PipelineError::NoSymbols);
        }
        info!(
            run_date = %request.run_date,
            symbols = symbols.len(),
            workers = self.config.workers,
            "pipeline run starting"
        );

        let runner = StageRunner {
            services: &self.services,
            config: &self.config,
            strict: request.strict || self.config.freshness.strict,
        };
        let process = |symbol: &Symbol| self.process_symbol(&runner, symbol, request, progress);

        let results: Vec<Result<SymbolOutcome, PipelineError>> = if self.config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()?;
            pool.install(|| symbols.par_iter().map(process).collect())
        } else {
            symbols.iter().map(process).collect()
        };
        let outcomes = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let mut summary = RunSummary::from_outcomes(request.run_date, outcomes, ignored);
        match write_run_summary(&self.config.paths.report_root, &summary) {
            Ok(files) => summary.summary_files = files,
            Err(e) => warn!(error = %e, "failed to write run summary files"),
        }

        info!(
            run_date = %summary.run_date,
            status = summary.status.as_str(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            "pipeline run finished"
        );
        Ok(summary)
    }

    /// Resolve the request into registered symbols, plus the requested ids
    /// that were skipped.
    fn select_symbols(&self, request: &RunRequest) -> Result<(Vec<Symbol>, Vec<String>), PipelineError> {
        let registry = &self.services.registry;
        let Some(requested) = &request.symbols else {
            return Ok((registry.list_active()?, Vec::new()));
        };

        let mut symbols: Vec<Symbol> = Vec::new();
        let mut ignored = Vec::new();
        for raw in requested {
            let resolved = match parse_symbol(raw) {
                Ok(info) => registry.get(&info.symbol_id)?,
                Err(e) => {
                    warn!(symbol = %raw, error = %e, "ignoring unparseable symbol");
                    None
                }
            };
            match resolved {
                Some(symbol) if !symbols.iter().any(|s| s.symbol_id == symbol.symbol_id) => {
                    symbols.push(symbol)
                }
                Some(_) => {}
                None => {
                    warn!(symbol = %raw, "ignoring unregistered symbol");
                    ignored.push(raw.clone());
                }
            }
        }
        Ok((symbols, ignored))
    }

    fn process_symbol(
        &self,
        runner: &StageRunner<'_>,
        symbol: &Symbol,
        request: &RunRequest,
        progress: &dyn PipelineProgress,
    ) -> Result<SymbolOutcome, PipelineError> {
        let ledger = &self.services.ledger;
        let symbol_id = symbol.symbol_id.as_str();
        let mut work = SymbolWork::new(symbol.clone(), request.run_date, request.range);

        for stage in Stage::ALL {
            let handle = ledger.start(request.run_date, symbol_id, stage)?;
            match runner.run(stage, &mut work) {
                Ok(()) => {
                    ledger.complete(&handle, JobStatus::Success, None)?;
                    progress.on_stage_complete(symbol_id, stage, JobStatus::Success);
                }
                Err(e) => {
                    let detail = e.ledger_detail();
                    error!(symbol_id, stage = %stage, error = %detail, "stage failed");
                    ledger.complete(&handle, JobStatus::Failed, Some(&detail))?;
                    progress.on_stage_complete(symbol_id, stage, JobStatus::Failed);

                    if e.is_fatal() {
                        return Err(PipelineError::Contract {
                            symbol_id: symbol_id.to_string(),
                            detail,
                        });
                    }

                    let skip_note = format!("skipped: {stage} failed");
                    for &rest in stage.remaining() {
                        ledger.record(
                            request.run_date,
                            symbol_id,
                            rest,
                            JobStatus::Skipped,
                            Some(&skip_note),
                        )?;
                        progress.on_stage_complete(symbol_id, rest, JobStatus::Skipped);
                    }

                    let outcome = SymbolOutcome {
                        symbol_id: symbol_id.to_string(),
                        succeeded: false,
                        failed_stage: Some(stage),
                        error: Some(detail),
                        metrics: work.take_metrics(),
                        warnings: work.warnings,
                        artifacts: work.artifacts,
                    };
                    progress.on_symbol_complete(&outcome);
                    return Ok(outcome);
                }
            }
        }

        let outcome = SymbolOutcome {
            symbol_id: symbol_id.to_string(),
            succeeded: true,
            failed_stage: None,
            error: None,
            metrics: work.take_metrics(),
            warnings: work.warnings,
            artifacts: work.artifacts,
        };
        progress.on_symbol_complete(&outcome);
        Ok(outcome)
    }
}
