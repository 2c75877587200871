//! Upstream source trait and the structured data error taxonomy.
//!
//! The `UpstreamSource` trait abstracts over concrete data sources (local CSV
//! drops, HTTP JSON endpoints) so the adapter can route per market/dataset and
//! tests can substitute scripted sources. Sources know nothing about retries,
//! caching, or column contracts; those sit above this trait.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::table::Table;
use crate::store::StoreError;

/// Structured errors for data operations.
///
/// Only `UpstreamUnavailable` is retryable. Everything here is caught at the
/// per-symbol stage boundary and recorded in the ledger.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("upstream '{source_name}' unavailable: {reason}")]
    UpstreamUnavailable { source_name: String, reason: String },

    #[error("schema drift in {dataset}: missing required columns [{}]", .missing.join(", "))]
    SchemaDrift { dataset: String, missing: Vec<String> },

    #[error("no data available for {dataset}: {cause}")]
    NoDataAvailable { dataset: String, cause: String },

    #[error("no upstream route for market {market} dataset {dataset}")]
    NoRoute { market: String, dataset: String },

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DataError {
    pub fn unavailable(source_name: &str, reason: impl Into<String>) -> Self {
        DataError::UpstreamUnavailable {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::UpstreamUnavailable { .. })
    }

    /// Re-label the dataset named in drift / no-data errors, e.g. to include
    /// the symbol the request was for.
    pub fn with_dataset(self, label: impl Into<String>) -> Self {
        match self {
            DataError::SchemaDrift { missing, .. } => DataError::SchemaDrift {
                dataset: label.into(),
                missing,
            },
            DataError::NoDataAvailable { cause, .. } => DataError::NoDataAvailable {
                dataset: label.into(),
                cause,
            },
            other => other,
        }
    }

    /// Short machine-friendly name used as the prefix of ledger error details.
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            DataError::SchemaDrift { .. } => "SchemaDriftError",
            DataError::NoDataAvailable { .. } => "NoDataAvailableError",
            DataError::NoRoute { .. } => "NoRoute",
            DataError::UnknownSymbol(_) => "UnknownSymbol",
            DataError::Cache(_) => "CacheError",
            DataError::Store(_) => "StoreError",
        }
    }
}

/// Inclusive date range for timeseries requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A single call to an upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Source-specific endpoint name (e.g. `stock_zh_a_hist`).
    pub endpoint: String,
    /// Symbol already rendered in the source's format, or the dataset key for
    /// aggregate requests.
    pub subject: String,
    pub range: Option<DateRange>,
}

/// A data source that returns raw tabular data or fails.
pub trait UpstreamSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Perform one fetch. An empty table means "no rows", not an error.
    fn fetch(&self, request: &FetchRequest) -> Result<Table, DataError>;
}
