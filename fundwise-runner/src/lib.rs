//! Fundwise Runner: daily pipeline orchestration on top of `fundwise-core`.
//!
//! This crate provides:
//! - TOML configuration and source/route wiring
//! - The per-symbol stage machine with ledger bookkeeping
//! - Price metrics, company fundamentals, watchlist scoring and the market panel
//! - Report artifacts (Markdown, JSON, SVG) and run summaries
//! - Read-only health check and history report over the ledger

pub mod config;
pub mod dossier;
pub mod health;
pub mod history;
pub mod metrics;
pub mod pipeline;
pub mod reporting;
pub mod screening;
pub mod services;
mod stages;

pub use config::{ConfigError, PipelineConfig, SourceConfig, SourceKind};
pub use dossier::Fundamentals;
pub use health::{evaluate as evaluate_health, HealthError, HealthReport, SymbolHealth, SymbolHealthState};
pub use history::{render_history_markdown, run_overviews, RunOverview};
pub use metrics::{Converted, SymbolMetrics};
pub use pipeline::{
    ExitPolicy, NoProgress, Pipeline, PipelineError, PipelineProgress, RunRequest, RunSummary,
    SymbolOutcome,
};
pub use screening::{FactorScores, MarketPanel, MarketState, Tier, WatchlistScore};
pub use services::Services;
pub use stages::StageError;
