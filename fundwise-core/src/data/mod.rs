//! Data acquisition: upstream sources, column contracts, retries, the
//! cache-fallback snapshot store, and the adapter that ties them together.

pub mod adapter;
pub mod csv_source;
pub mod http_source;
pub mod provider;
pub mod retry;
pub mod router;
pub mod schema;
pub mod snapshot;
pub mod table;

pub use adapter::{
    AggregateResult, ConversionResult, DataAdapter, FreshnessPolicy, StaleDataWarning,
    TimeseriesResult,
};
pub use csv_source::CsvDirSource;
pub use http_source::HttpJsonSource;
pub use provider::{DataError, DateRange, FetchRequest, UpstreamSource};
pub use retry::{fetch_with_retry, RetryPolicy};
pub use router::SourceRouter;
pub use schema::{normalize_table, DatasetKind};
pub use snapshot::{Snapshot, SnapshotStore};
pub use table::{Cell, Table, UNAVAILABLE};
