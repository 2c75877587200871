//! Cache-fallback durability across process restarts and upstream outages.

use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fundwise_core::clock::FixedClock;
use fundwise_core::data::{
    Cell, DataAdapter, DataError, DatasetKind, FetchRequest, RetryPolicy, SnapshotStore,
    SourceRouter, Table, UpstreamSource,
};
use fundwise_core::store::{Database, FxRateStore, SymbolRegistry};

/// Serves one industry table until switched off.
struct Flaky {
    up: AtomicBool,
}

impl UpstreamSource for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn fetch(&self, _request: &FetchRequest) -> Result<Table, DataError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(DataError::unavailable("flaky", "503 Service Unavailable"));
        }
        let mut t = Table::new(vec!["日期".into(), "行业名称".into(), "静态市盈率".into()]);
        t.push_row(vec![
            Cell::Text("2026-02-26".into()),
            Cell::Text("半导体".into()),
            Cell::Text("61.3".into()),
        ]);
        Ok(t)
    }
}

fn adapter(cache_root: &std::path::Path, source: Arc<Flaky>) -> DataAdapter {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 27, 8, 0, 0).unwrap()));
    let router = SourceRouter::new().aggregate("industry:", DatasetKind::IndustryPe, source, "industry_pe");
    DataAdapter::new(
        router,
        SnapshotStore::new(cache_root),
        SymbolRegistry::new(db.clone(), clock.clone()),
        FxRateStore::new(db, clock.clone()),
        clock,
    )
    .with_retry(RetryPolicy::immediate(2))
}

#[test]
fn one_live_success_covers_later_outages_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(Flaky {
        up: AtomicBool::new(true),
    });

    let live = adapter(dir.path(), source.clone())
        .fetch_aggregate("industry:semiconductors")
        .unwrap();
    assert!(!live.is_fallback);
    assert_eq!(live.table.cell(0, "industry_pe"), Some(&Cell::Number(61.3)));

    source.up.store(false, Ordering::SeqCst);
    for _ in 0..2 {
        // Fresh adapter each time: nothing is held in memory between calls.
        let fallback = adapter(dir.path(), source.clone())
            .fetch_aggregate("industry:semiconductors")
            .unwrap();
        assert!(fallback.is_fallback);
        assert_eq!(fallback.table, live.table);
        assert_eq!(fallback.fetched_at, live.fetched_at);
        assert!(fallback.live_error.unwrap().contains("503"));
    }

    let other = adapter(dir.path(), source).fetch_aggregate("industry:banks");
    assert!(matches!(other, Err(DataError::NoDataAvailable { .. })));
}
