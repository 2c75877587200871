//! Stage bodies for one symbol: fetch → normalize → compute → report.
//!
//! Each stage reads what the previous one left in [`SymbolWork`] and adds its
//! own output. Stages never touch the ledger; the orchestrator wraps every call
//! in a start/complete pair.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use fundwise_core::data::{
    AggregateResult, DataError, DatasetKind, DateRange, StaleDataWarning, Table, TimeseriesResult,
};
use fundwise_core::domain::{symbol_dir_name, Stage, Symbol};
use fundwise_core::store::{ArtifactRecord, StoreError};

use crate::config::PipelineConfig;
use crate::dossier::Fundamentals;
use crate::metrics::{AggregateSummary, SymbolMetrics};
use crate::reporting::{write_atomic, write_symbol_report};
use crate::services::Services;

/// Why a stage failed. Everything here except contract violations is
/// recorded as a `failed` ledger row and confined to the symbol.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("{0}")]
    Stale(StaleDataWarning),

    #[error("failed to export {dataset}: {reason}")]
    Export { dataset: String, reason: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stage {0} produced no output")]
    MissingInput(Stage),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Data(e) => e.kind(),
            StageError::Stale(_) => "StaleDataError",
            StageError::Export { .. } => "ExportError",
            StageError::Io { .. } => "IoError",
            StageError::Store(_) => "StoreError",
            StageError::MissingInput(_) => "MissingInput",
        }
    }

    /// Text stored in the ledger's `error_detail`.
    pub fn ledger_detail(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Contract violations abort the whole run instead of one symbol.
    pub fn is_fatal(&self) -> bool {
        match self {
            StageError::Store(e) | StageError::Data(DataError::Store(e)) => e.is_contract_violation(),
            _ => false,
        }
    }
}

struct NormalizedDataset {
    kind: DatasetKind,
    table: Table,
}

/// Per-symbol state carried between stages.
pub(crate) struct SymbolWork {
    pub symbol: Symbol,
    pub run_date: NaiveDate,
    pub range: DateRange,
    fetched: Vec<TimeseriesResult>,
    aggregates: Vec<AggregateResult>,
    normalized: Vec<NormalizedDataset>,
    metrics: Option<SymbolMetrics>,
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl SymbolWork {
    pub fn new(symbol: Symbol, run_date: NaiveDate, range: DateRange) -> Self {
        Self {
            symbol,
            run_date,
            range,
            fetched: Vec::new(),
            aggregates: Vec::new(),
            normalized: Vec::new(),
            metrics: None,
            artifacts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn dataset(&self, kind: DatasetKind) -> Option<&Table> {
        self.normalized
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| &d.table)
    }

    fn prices(&self) -> Option<&Table> {
        self.dataset(DatasetKind::PriceHistory)
    }

    /// Metrics left by the compute stage, if it ran.
    pub fn take_metrics(&mut self) -> Option<SymbolMetrics> {
        self.metrics.take()
    }
}

pub(crate) struct StageRunner<'a> {
    pub services: &'a Services,
    pub config: &'a PipelineConfig,
    pub strict: bool,
}

impl StageRunner<'_> {
    pub fn run(&self, stage: Stage, work: &mut SymbolWork) -> Result<(), StageError> {
        match stage {
            Stage::Fetch => self.fetch(work),
            Stage::Normalize => self.normalize(work),
            Stage::Compute => self.compute(work),
            Stage::Report => self.report(work),
        }
    }

    fn fetch(&self, work: &mut SymbolWork) -> Result<(), StageError> {
        let adapter = &self.services.adapter;
        let symbol_id = work.symbol.symbol_id.clone();

        for &kind in &self.config.datasets {
            let result = adapter.fetch_timeseries(&symbol_id, kind, work.range)?;
            debug!(symbol_id = %symbol_id, dataset = %kind, source = %result.source, rows = result.table.len(), "fetched");
            work.fetched.push(result);
        }

        for key in self.config.aggregates_for(&symbol_id) {
            let result = adapter.fetch_aggregate(key)?;
            if result.is_fallback {
                work.warnings.push(format!(
                    "{key}: live fetch failed, using snapshot from {}",
                    result.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
            work.aggregates.push(result);
        }
        Ok(())
    }

    fn normalize(&self, work: &mut SymbolWork) -> Result<(), StageError> {
        if work.fetched.is_empty() {
            return Err(StageError::MissingInput(Stage::Fetch));
        }
        let symbol_id = work.symbol.symbol_id.clone();
        let target = &self.config.target_currency;
        let export_dir = self
            .config
            .paths
            .normalized_root
            .join(work.run_date.format("%Y-%m-%d").to_string())
            .join(symbol_dir_name(&symbol_id));

        for ts in std::mem::take(&mut work.fetched) {
            let label = format!("{symbol_id}/{}", ts.kind);

            if let Some(stale) = self.config.freshness.assess(&label, &ts.table, work.run_date) {
                if self.strict {
                    return Err(StageError::Stale(stale));
                }
                warn!(symbol_id = %symbol_id, warning = %stale, "stale data");
                work.warnings.push(stale.to_string());
            }

            let converted = self
                .services
                .adapter
                .convert_currency(&ts.table, &symbol_id, target)?;
            if converted.gap_rows > 0 {
                work.warnings.push(format!(
                    "{label}: no {}->{} rate for {} rows, converted columns marked unavailable",
                    converted.from_currency, converted.target_currency, converted.gap_rows
                ));
            }

            let csv = converted.table.to_csv().map_err(|e| StageError::Export {
                dataset: label.clone(),
                reason: e.to_string(),
            })?;
            let path = export_dir.join(format!("{}.csv", ts.kind));
            write_atomic(&path, csv.as_bytes()).map_err(|source| StageError::Io {
                path: path.display().to_string(),
                source,
            })?;
            work.artifacts.push(path);

            work.normalized.push(NormalizedDataset {
                kind: ts.kind,
                table: converted.table,
            });
        }
        Ok(())
    }

    fn compute(&self, work: &mut SymbolWork) -> Result<(), StageError> {
        if work.normalized.is_empty() {
            return Err(StageError::MissingInput(Stage::Normalize));
        }
        let mut metrics = SymbolMetrics::compute(
            &work.symbol.symbol_id,
            work.run_date,
            &work.symbol.currency,
            &self.config.target_currency,
            work.prices(),
        );
        metrics.fundamentals = Fundamentals::compute(
            &self.config.target_currency,
            work.prices(),
            work.dataset(DatasetKind::MarketCap),
            work.dataset(DatasetKind::Financials),
        );
        metrics.aggregates = work.aggregates.iter().map(AggregateSummary::from_result).collect();
        metrics.warnings = work.warnings.clone();
        work.metrics = Some(metrics);
        Ok(())
    }

    fn report(&self, work: &mut SymbolWork) -> Result<(), StageError> {
        let metrics = work
            .metrics
            .as_ref()
            .ok_or(StageError::MissingInput(Stage::Compute))?;
        let report_root = &self.config.paths.report_root;
        let written = write_symbol_report(report_root, metrics, work.prices()).map_err(|source| {
            StageError::Io {
                path: report_root.display().to_string(),
                source,
            }
        })?;

        let generated_at = self.services.clock.now();
        for artifact in &written {
            self.services.artifacts.upsert(&ArtifactRecord {
                run_date: work.run_date,
                symbol_id: work.symbol.symbol_id.clone(),
                kind: artifact.kind.clone(),
                path: artifact.path.display().to_string(),
                checksum: artifact.checksum.clone(),
                generated_at,
            })?;
        }
        let kinds: Vec<&str> = written.iter().map(|a| a.kind.as_str()).collect();
        let dropped = self
            .services
            .artifacts
            .retain_kinds(work.run_date, &work.symbol.symbol_id, &kinds)?;
        if dropped > 0 {
            debug!(symbol_id = %work.symbol.symbol_id, dropped, "dropped artifacts no longer produced");
        }
        work.artifacts.extend(written.into_iter().map(|a| a.path));
        Ok(())
    }
}
