//! Serializable pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a runnable
//! configuration that reads upstream CSV drops from `data/upstream`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use fundwise_core::data::{
    CsvDirSource, DatasetKind, FreshnessPolicy, HttpJsonSource, RetryPolicy, SourceRouter,
    UpstreamSource,
};
use fundwise_core::domain::{Market, SymbolFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to build source '{name}': {reason}")]
    Source { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Currency every monetary column is converted into.
    pub target_currency: String,
    /// Symbols processed concurrently. 1 = sequential.
    pub workers: usize,
    /// Default history window when no start date is given.
    pub lookback_days: i64,
    /// Timeseries fetched for every symbol.
    pub datasets: Vec<DatasetKind>,
    pub paths: PathsConfig,
    pub retry: RetryPolicy,
    pub freshness: FreshnessPolicy,
    pub ledger: LedgerConfig,
    pub health: HealthConfig,
    pub fx: FxConfig,
    pub sources: Vec<SourceConfig>,
    pub routes: Vec<RouteConfig>,
    pub aggregate_routes: Vec<AggregateRouteConfig>,
    /// Aggregate dataset keys fetched in a symbol's fetch stage.
    pub aggregates: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db_path: PathBuf,
    pub cache_root: PathBuf,
    pub report_root: PathBuf,
    pub normalized_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/metadata/fundwise.db"),
            cache_root: PathBuf::from("data/cache/aggregates"),
            report_root: PathBuf::from("reports"),
            normalized_root: PathBuf::from("data/normalized"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// A `started` row older than this is read as failed.
    pub abandoned_grace_hours: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            abandoned_grace_hours: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub max_delay_hours: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_delay_hours: 36.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    /// 0 = exact-date rates only.
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CsvDir,
    HttpJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// Root directory for `csv_dir` sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Base URL for `http_json` sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub market: Market,
    pub dataset: DatasetKind,
    pub source: String,
    pub endpoint: String,
    #[serde(default)]
    pub symbol_format: SymbolFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRouteConfig {
    pub prefix: String,
    pub dataset: DatasetKind,
    pub source: String,
    pub endpoint: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_currency: "CNY".into(),
            workers: 1,
            lookback_days: 365,
            datasets: vec![DatasetKind::PriceHistory],
            paths: PathsConfig::default(),
            retry: RetryPolicy::default(),
            freshness: FreshnessPolicy::default(),
            ledger: LedgerConfig::default(),
            health: HealthConfig::default(),
            fx: FxConfig::default(),
            sources: vec![SourceConfig {
                name: "local".into(),
                kind: SourceKind::CsvDir,
                root: Some(PathBuf::from("data/upstream")),
                base_url: None,
            }],
            routes: vec![
                RouteConfig {
                    market: Market::Cn,
                    dataset: DatasetKind::PriceHistory,
                    source: "local".into(),
                    endpoint: "cn_price_history".into(),
                    symbol_format: SymbolFormat::LowerPrefixed,
                },
                RouteConfig {
                    market: Market::Hk,
                    dataset: DatasetKind::PriceHistory,
                    source: "local".into(),
                    endpoint: "hk_price_history".into(),
                    symbol_format: SymbolFormat::Code,
                },
            ],
            aggregate_routes: vec![AggregateRouteConfig {
                prefix: "industry:".into(),
                dataset: DatasetKind::IndustryPe,
                source: "local".into(),
                endpoint: "industry_pe".into(),
            }],
            aggregates: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.target_currency.trim().is_empty() {
            return invalid("target_currency must be non-empty");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.timeout_secs == 0 {
            return invalid("retry.timeout_secs must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.lookback_days <= 0 {
            return invalid("lookback_days must be positive");
        }
        if self.freshness.max_age_days < 0 {
            return invalid("freshness.max_age_days must not be negative");
        }
        if self.ledger.abandoned_grace_hours <= 0 {
            return invalid("ledger.abandoned_grace_hours must be positive");
        }
        if self.health.max_delay_hours <= 0.0 {
            return invalid("health.max_delay_hours must be positive");
        }
        if self.datasets.is_empty() {
            return invalid("datasets must list at least one dataset kind");
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        let referenced = self
            .routes
            .iter()
            .map(|r| r.source.as_str())
            .chain(self.aggregate_routes.iter().map(|r| r.source.as_str()));
        for name in referenced {
            if !names.contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "route references unknown source '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Instantiate the configured sources and assemble the routing table.
    pub fn build_router(&self) -> Result<SourceRouter, ConfigError> {
        let mut sources: HashMap<&str, Arc<dyn UpstreamSource>> = HashMap::new();
        for cfg in &self.sources {
            let source: Arc<dyn UpstreamSource> = match cfg.kind {
                SourceKind::CsvDir => {
                    let root = cfg.root.clone().ok_or_else(|| ConfigError::Source {
                        name: cfg.name.clone(),
                        reason: "csv_dir source requires `root`".into(),
                    })?;
                    Arc::new(CsvDirSource::new(cfg.name.clone(), root))
                }
                SourceKind::HttpJson => {
                    let base_url = cfg.base_url.clone().ok_or_else(|| ConfigError::Source {
                        name: cfg.name.clone(),
                        reason: "http_json source requires `base_url`".into(),
                    })?;
                    let source = HttpJsonSource::new(cfg.name.clone(), base_url, self.retry.timeout())
                        .map_err(|e| ConfigError::Source {
                            name: cfg.name.clone(),
                            reason: e.to_string(),
                        })?;
                    Arc::new(source)
                }
            };
            sources.insert(cfg.name.as_str(), source);
        }

        let lookup = |name: &str| {
            sources
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::Invalid(format!("route references unknown source '{name}'")))
        };

        let mut router = SourceRouter::new();
        for route in &self.routes {
            router = router.route(
                route.market,
                route.dataset,
                lookup(&route.source)?,
                route.endpoint.clone(),
                route.symbol_format,
            );
        }
        for route in &self.aggregate_routes {
            router = router.aggregate(
                route.prefix.clone(),
                route.dataset,
                lookup(&route.source)?,
                route.endpoint.clone(),
            );
        }
        Ok(router)
    }

    /// Aggregate keys configured for a symbol.
    pub fn aggregates_for(&self, symbol_id: &str) -> &[String] {
        self.aggregates
            .get(symbol_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
