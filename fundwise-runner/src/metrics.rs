//! Per-symbol statistics computed from a normalized, converted price table.
//!
//! The scalar functions are pure: a close series in, a number out. Nothing
//! here touches the adapter, the ledger, or the filesystem.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use fundwise_core::data::{AggregateResult, Cell, Table, UNAVAILABLE};

use crate::dossier::Fundamentals;

/// A value in the target currency, or the explicit marker when no FX rate
/// could be resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Converted {
    Value(f64),
    Unavailable,
}

impl Serialize for Converted {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Converted::Value(v) => serializer.serialize_f64(*v),
            Converted::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

impl fmt::Display for Converted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converted::Value(v) => write!(f, "{v:.2}"),
            Converted::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// Latest row of an aggregate dataset attached to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub dataset_key: String,
    pub is_fallback: bool,
    pub rows: usize,
    pub latest: BTreeMap<String, String>,
}

impl AggregateSummary {
    pub fn from_result(result: &AggregateResult) -> Self {
        let latest = result
            .table
            .rows
            .last()
            .map(|row| {
                result
                    .table
                    .columns
                    .iter()
                    .zip(row)
                    .filter(|(_, cell)| !cell.is_null())
                    .map(|(name, cell)| (name.clone(), cell.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            dataset_key: result.dataset_key.clone(),
            is_fallback: result.is_fallback,
            rows: result.table.len(),
            latest,
        }
    }
}

/// Everything the report stage renders for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolMetrics {
    pub symbol_id: String,
    pub run_date: NaiveDate,
    pub currency: String,
    pub target_currency: String,
    pub observations: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub last_close: Option<f64>,
    pub last_close_converted: Option<Converted>,
    pub total_return: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub fx_gap_rows: usize,
    /// Filled by the compute stage when `market_cap` or `financials` were
    /// fetched; all `None` otherwise.
    pub fundamentals: Fundamentals,
    pub warnings: Vec<String>,
    pub aggregates: Vec<AggregateSummary>,
}

impl SymbolMetrics {
    /// Compute from a price table that already carries the converted close
    /// column (`close_<target>`). Metrics that need at least two closes are
    /// `None` on shorter series.
    pub fn compute(
        symbol_id: &str,
        run_date: NaiveDate,
        currency: &str,
        target_currency: &str,
        prices: Option<&Table>,
    ) -> Self {
        let target = target_currency.to_ascii_uppercase();
        let mut metrics = Self {
            symbol_id: symbol_id.to_string(),
            run_date,
            currency: currency.to_string(),
            target_currency: target.clone(),
            observations: 0,
            first_date: None,
            last_date: None,
            last_close: None,
            last_close_converted: None,
            total_return: None,
            max_drawdown: None,
            annualized_volatility: None,
            fx_gap_rows: 0,
            fundamentals: Fundamentals::default(),
            warnings: Vec::new(),
            aggregates: Vec::new(),
        };
        let Some(table) = prices else {
            return metrics;
        };

        let closes = table.numbers("close");
        metrics.observations = table.len();
        metrics.first_date = table.column("date").find_map(Cell::as_date);
        metrics.last_date = table.latest_date();
        metrics.last_close = closes.last().copied();

        let converted_col = converted_column("close", &target);
        metrics.last_close_converted = table
            .len()
            .checked_sub(1)
            .and_then(|last| converted_at(table, last, &converted_col));
        metrics.fx_gap_rows = table
            .column(&converted_col)
            .filter(|c| c.is_unavailable())
            .count();

        if closes.len() >= 2 {
            metrics.total_return = Some(total_return(&closes));
            metrics.max_drawdown = Some(max_drawdown(&closes));
            metrics.annualized_volatility = Some(annualized_volatility(&closes));
        }
        metrics
    }
}

/// Name of the target-currency sibling of a monetary column.
pub(crate) fn converted_column(column: &str, target_currency: &str) -> String {
    format!("{column}_{}", target_currency.to_ascii_lowercase())
}

/// Read a converted cell; plain nulls (no source value) are `None`.
pub(crate) fn converted_at(table: &Table, row: usize, column: &str) -> Option<Converted> {
    match table.cell(row, column)? {
        Cell::Number(v) => Some(Converted::Value(*v)),
        Cell::Unavailable => Some(Converted::Unavailable),
        _ => None,
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (last - first) / first.
pub fn total_return(series: &[f64]) -> f64 {
    match (series.first(), series.last()) {
        (Some(&first), Some(&last)) if series.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 for constant or monotonically increasing series.
pub fn max_drawdown(series: &[f64]) -> f64 {
    let Some(&first) = series.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &value in series {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Sample standard deviation of daily returns, scaled by sqrt(252).
pub fn annualized_volatility(series: &[f64]) -> f64 {
    std_dev(&daily_returns(series)) * (252.0_f64).sqrt()
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn daily_returns(series: &[f64]) -> Vec<f64> {
    series
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
