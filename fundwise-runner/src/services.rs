//! Wiring: one metadata database shared by the registry, FX store, ledger and
//! artifact index, plus the data adapter built from the configured routes.

use std::sync::Arc;

use fundwise_core::clock::Clock;
use fundwise_core::data::{DataAdapter, SnapshotStore, SourceRouter};
use fundwise_core::store::{ArtifactIndex, Database, FxRateStore, JobLedger, SymbolRegistry};

use crate::config::PipelineConfig;
use crate::pipeline::PipelineError;

pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub registry: SymbolRegistry,
    pub fx: FxRateStore,
    pub ledger: JobLedger,
    pub artifacts: ArtifactIndex,
    pub adapter: DataAdapter,
}

impl Services {
    /// Open (and migrate) the database at `paths.db_path` and build the
    /// configured upstream sources.
    pub fn open(config: &PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        let db = Database::open(&config.paths.db_path)?;
        let router = config.build_router()?;
        Ok(Self::assemble(config, db, router, clock))
    }

    /// Build from an already-open database and router. Tests use this with an
    /// in-memory database and scripted sources.
    pub fn assemble(
        config: &PipelineConfig,
        db: Database,
        router: SourceRouter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = SymbolRegistry::new(db.clone(), Arc::clone(&clock));
        let fx = FxRateStore::new(db.clone(), Arc::clone(&clock));
        let ledger = JobLedger::new(db.clone(), Arc::clone(&clock));
        let artifacts = ArtifactIndex::new(db);
        let adapter = DataAdapter::new(
            router,
            SnapshotStore::new(config.paths.cache_root.clone()),
            registry.clone(),
            fx.clone(),
            Arc::clone(&clock),
        )
        .with_retry(config.retry.clone())
        .with_fx_lookback_days(config.fx.lookback_days);

        Self {
            clock,
            registry,
            fx,
            ledger,
            artifacts,
            adapter,
        }
    }
}
