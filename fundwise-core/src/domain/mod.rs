//! Domain types shared by the stores, the adapter, and the orchestrator.

pub mod job;
pub mod symbol;

pub use job::{
    derive_run_status, EffectiveStatus, JobRecord, JobStatus, RunOutcome, RunStatus, Stage,
};
pub use symbol::{
    load_symbol_list, parse_symbol, symbol_dir_name, Exchange, Market, SymbolFormat, SymbolInfo,
    SymbolParseError,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A registered instrument. `market` and `currency` are immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol_id: String,
    pub market: Market,
    pub currency: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// A stored conversion rate: `1 base = rate quote` on `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub date: NaiveDate,
    pub base_currency: String,
    pub quote_currency: String,
    pub rate: f64,
    pub source: String,
}
