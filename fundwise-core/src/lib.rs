//! Fundwise Core: domain types, data adapter, cache-fallback store, and the
//! SQLite-backed symbol registry, FX rate store, and job ledger.
//!
//! This crate contains everything the daily pipeline reads from or writes to:
//! - Canonical symbols and their source-specific spellings
//! - A uniform tabular contract per dataset kind, enforced eagerly
//! - Upstream sources behind a trait, with bounded retries and timeouts
//! - Last-known-good snapshots for aggregate datasets
//! - An append-only job ledger with derived run status

pub mod clock;
pub mod data;
pub mod domain;
pub mod store;
