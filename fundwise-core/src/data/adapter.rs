//! Data adapter: one canonical symbol + dataset kind in, one normalized table
//! out, whichever upstream source supplies it.
//!
//! Fallback policy for aggregates (`fetch_aggregate`):
//! 1. Live fetch through the routed source (with retries).
//! 2. Success with rows: write-through to the snapshot store, return live.
//! 3. Empty result or upstream outage: return the stored snapshot tagged
//!    `is_fallback = true`.
//! 4. No snapshot either: `NoDataAvailable`.
//!
//! Schema drift and missing routes are returned as-is: a snapshot would hide
//! a contract or configuration break for as long as it keeps failing.
//!
//! FX fallback policy for `convert_currency`, per row date:
//! 1. Exact-date rate for `symbol.currency → target`.
//! 2. Inverse of the exact-date reverse pair.
//! 3. If `fx_lookback_days > 0`, the most recent rate (or inverse) inside
//!    the window.
//! 4. Otherwise the converted cell is `unavailable`; never a silent 1.0.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::provider::{DataError, DateRange, FetchRequest};
use super::retry::{fetch_with_retry, RetryPolicy};
use super::router::SourceRouter;
use super::schema::{is_monetary, normalize_table, DatasetKind};
use super::snapshot::SnapshotStore;
use super::table::{Cell, Table};
use crate::clock::Clock;
use crate::domain::{parse_symbol, Symbol};
use crate::store::{FxRateStore, SymbolRegistry};

/// Staleness window for timeseries results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessPolicy {
    pub max_age_days: i64,
    /// Treat stale data as a failure instead of a warning.
    pub strict: bool,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 45,
            strict: false,
        }
    }
}

impl FreshnessPolicy {
    /// `Some(warning)` if the table's latest row is older than the window
    /// relative to `run_date`, or has no dated rows at all.
    pub fn assess(&self, dataset: &str, table: &Table, run_date: NaiveDate) -> Option<StaleDataWarning> {
        let latest = table.latest_date();
        let age_days = latest.map(|d| (run_date - d).num_days());
        let stale = match age_days {
            Some(age) => age > self.max_age_days,
            None => true,
        };
        stale.then(|| StaleDataWarning {
            dataset: dataset.to_string(),
            latest_date: latest,
            run_date,
            age_days,
            threshold_days: self.max_age_days,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleDataWarning {
    pub dataset: String,
    pub latest_date: Option<NaiveDate>,
    pub run_date: NaiveDate,
    pub age_days: Option<i64>,
    pub threshold_days: i64,
}

impl fmt::Display for StaleDataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.latest_date, self.age_days) {
            (Some(latest), Some(age)) => write!(
                f,
                "{} is stale: latest row {latest} is {age} days before {} (threshold {} days)",
                self.dataset, self.run_date, self.threshold_days
            ),
            _ => write!(f, "{} has no dated rows", self.dataset),
        }
    }
}

/// A normalized timeseries and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesResult {
    pub symbol_id: String,
    pub kind: DatasetKind,
    pub source: String,
    pub table: Table,
}

/// An aggregate dataset, live or from the fallback snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub dataset_key: String,
    pub table: Table,
    pub is_fallback: bool,
    pub fetched_at: DateTime<Utc>,
    /// Why the live fetch was not used, when `is_fallback`.
    pub live_error: Option<String>,
}

/// Output of `convert_currency`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub table: Table,
    pub from_currency: String,
    pub target_currency: String,
    /// Names of the added `<column>_<target>` columns.
    pub converted_columns: Vec<String>,
    /// Rows for which no rate could be resolved.
    pub gap_rows: usize,
}

pub struct DataAdapter {
    router: SourceRouter,
    snapshots: SnapshotStore,
    registry: SymbolRegistry,
    fx: FxRateStore,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    fx_lookback_days: u32,
}

impl DataAdapter {
    pub fn new(
        router: SourceRouter,
        snapshots: SnapshotStore,
        registry: SymbolRegistry,
        fx: FxRateStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router,
            snapshots,
            registry,
            fx,
            clock,
            retry: RetryPolicy::default(),
            fx_lookback_days: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fx_lookback_days(mut self, days: u32) -> Self {
        self.fx_lookback_days = days;
        self
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    fn symbol(&self, symbol_id: &str) -> Result<Symbol, DataError> {
        self.registry
            .get(symbol_id)?
            .ok_or_else(|| DataError::UnknownSymbol(symbol_id.to_string()))
    }

    /// Fetch and normalize one timeseries for a registered symbol.
    pub fn fetch_timeseries(
        &self,
        symbol_id: &str,
        kind: DatasetKind,
        range: DateRange,
    ) -> Result<TimeseriesResult, DataError> {
        let symbol = self.symbol(symbol_id)?;
        let info = parse_symbol(&symbol.symbol_id)
            .map_err(|_| DataError::UnknownSymbol(symbol_id.to_string()))?;
        let route = self
            .router
            .timeseries_route(symbol.market, kind)
            .ok_or_else(|| DataError::NoRoute {
                market: symbol.market.to_string(),
                dataset: kind.to_string(),
            })?;

        let request = FetchRequest {
            endpoint: route.endpoint.clone(),
            subject: info.format(route.symbol_format),
            range: Some(range),
        };
        let raw = fetch_with_retry(&route.source, &request, &self.retry)?;
        let table = normalize_table(kind, &raw)
            .map_err(|e| e.with_dataset(format!("{symbol_id}/{kind}")))?;

        Ok(TimeseriesResult {
            symbol_id: symbol.symbol_id,
            kind,
            source: route.source.name().to_string(),
            table,
        })
    }

    /// Fetch a shared low-frequency dataset, falling back to the last
    /// known-good snapshot.
    pub fn fetch_aggregate(&self, dataset_key: &str) -> Result<AggregateResult, DataError> {
        match self.fetch_aggregate_live(dataset_key) {
            Ok(table) => {
                let fetched_at = self.clock.now();
                if let Err(e) = self.snapshots.write(dataset_key, &table, fetched_at) {
                    warn!(dataset_key, error = %e, "snapshot write-through failed");
                }
                Ok(AggregateResult {
                    dataset_key: dataset_key.to_string(),
                    table,
                    is_fallback: false,
                    fetched_at,
                    live_error: None,
                })
            }
            Err(live_error) if !covered_by_snapshot(&live_error) => Err(live_error),
            Err(live_error) => match self.snapshots.read(dataset_key) {
                Some(snapshot) => {
                    info!(
                        dataset_key,
                        snapshot_at = %snapshot.fetched_at,
                        error = %live_error,
                        "using fallback snapshot"
                    );
                    Ok(AggregateResult {
                        dataset_key: dataset_key.to_string(),
                        table: snapshot.table,
                        is_fallback: true,
                        fetched_at: snapshot.fetched_at,
                        live_error: Some(live_error.to_string()),
                    })
                }
                None => Err(DataError::NoDataAvailable {
                    dataset: dataset_key.to_string(),
                    cause: format!("live fetch failed ({live_error}) and no fallback snapshot exists"),
                }),
            },
        }
    }

    fn fetch_aggregate_live(&self, dataset_key: &str) -> Result<Table, DataError> {
        let route = self
            .router
            .aggregate_route(dataset_key)
            .ok_or_else(|| DataError::NoRoute {
                market: "*".into(),
                dataset: dataset_key.to_string(),
            })?;
        let request = FetchRequest {
            endpoint: route.endpoint.clone(),
            subject: dataset_key.to_string(),
            range: None,
        };
        let raw = fetch_with_retry(&route.source, &request, &self.retry)?;
        normalize_table(route.kind, &raw).map_err(|e| e.with_dataset(dataset_key))
    }

    /// Append `<column>_<target>` siblings for every monetary column, plus an
    /// `fx_rate_<target>` column. Rows with no resolvable rate get
    /// `unavailable` in every converted cell.
    pub fn convert_currency(
        &self,
        table: &Table,
        symbol_id: &str,
        target_currency: &str,
    ) -> Result<ConversionResult, DataError> {
        let symbol = self.symbol(symbol_id)?;
        let target = target_currency.trim().to_ascii_uppercase();
        let suffix = target.to_ascii_lowercase();

        let date_idx = table.column_index("date");
        let mut rates: HashMap<NaiveDate, Option<f64>> = HashMap::new();
        let mut row_rates = Vec::with_capacity(table.len());
        for row in &table.rows {
            let date = date_idx.and_then(|i| row.get(i)).and_then(Cell::as_date);
            let rate = match date {
                Some(d) => match rates.get(&d) {
                    Some(r) => *r,
                    None => {
                        let r = self.resolve_rate(d, &symbol.currency, &target)?;
                        rates.insert(d, r);
                        r
                    }
                },
                None => None,
            };
            row_rates.push(rate);
        }

        let mut out = table.clone();
        let monetary: Vec<(usize, String)> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| is_monetary(name))
            .map(|(i, name)| (i, format!("{name}_{suffix}")))
            .collect();

        for (idx, name) in &monetary {
            let mut rates_iter = row_rates.iter();
            out.add_column(name.clone(), |row| {
                let rate = rates_iter.next().copied().flatten();
                match (rate, row.get(*idx)) {
                    (None, _) => Cell::Unavailable,
                    (Some(r), Some(Cell::Number(v))) => Cell::number(v * r),
                    (Some(_), _) => Cell::Null,
                }
            });
        }
        let mut rates_iter = row_rates.iter();
        out.add_column(format!("fx_rate_{suffix}"), |_| {
            rates_iter
                .next()
                .copied()
                .flatten()
                .map_or(Cell::Unavailable, Cell::Number)
        });

        let gap_rows = row_rates.iter().filter(|r| r.is_none()).count();
        if gap_rows > 0 {
            warn!(
                symbol = symbol_id,
                from = %symbol.currency,
                to = %target,
                gap_rows,
                "fx rates missing, converted values marked unavailable"
            );
        }

        Ok(ConversionResult {
            table: out,
            from_currency: symbol.currency,
            target_currency: target,
            converted_columns: monetary.into_iter().map(|(_, n)| n).collect(),
            gap_rows,
        })
    }

    fn resolve_rate(&self, date: NaiveDate, base: &str, quote: &str) -> Result<Option<f64>, DataError> {
        if let Some(rate) = self.fx.lookup(date, base, quote)? {
            return Ok(Some(rate));
        }
        if let Some(reverse) = self.fx.lookup(date, quote, base)? {
            return Ok(Some(1.0 / reverse));
        }
        if self.fx_lookback_days == 0 {
            return Ok(None);
        }

        let earliest = date - Duration::days(i64::from(self.fx_lookback_days));
        let direct = self.fx.lookup_on_or_before(date, base, quote, earliest)?;
        let inverse = self.fx.lookup_on_or_before(date, quote, base, earliest)?;
        Ok(match (direct, inverse) {
            (Some(d), Some(i)) if i.date > d.date => Some(1.0 / i.rate),
            (Some(d), _) => Some(d.rate),
            (None, Some(i)) => Some(1.0 / i.rate),
            (None, None) => None,
        })
    }
}

/// Live aggregate failures that the last known-good snapshot may stand in for.
fn covered_by_snapshot(error: &DataError) -> bool {
    matches!(
        error,
        DataError::UpstreamUnavailable { .. } | DataError::NoDataAvailable { .. }
    )
}
