//! SQLite-backed persistence: symbol registry, FX rates, job ledger, and
//! the report artifact index. All four share one [`Database`] handle.

pub mod artifacts;
pub mod db;
pub mod error;
pub mod fx;
pub mod ledger;
pub mod registry;

pub use artifacts::{ArtifactIndex, ArtifactRecord};
pub use db::Database;
pub use error::StoreError;
pub use fx::FxRateStore;
pub use ledger::{HistoryQuery, JobHandle, JobLedger};
pub use registry::SymbolRegistry;
