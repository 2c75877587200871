//! End-to-end runs of the orchestrator against scripted upstream sources,
//! an in-memory ledger and a temporary artifact tree.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fundwise_core::clock::{Clock, FixedClock};
use fundwise_core::data::{
    Cell, DataError, DatasetKind, FetchRequest, RetryPolicy, SourceRouter, Table, UpstreamSource,
};
use fundwise_core::domain::{derive_run_status, JobStatus, Market, RunStatus, Stage, SymbolFormat};
use fundwise_core::store::{Database, HistoryQuery, SymbolRegistry};
use fundwise_runner::{
    ExitPolicy, NoProgress, Pipeline, PipelineConfig, PipelineError, RunRequest, Services,
};

// ── Scripted upstream ───────────────────────────────────────────────

/// Serves tables by request subject, or by `endpoint/subject` when one is
/// registered; subjects in `down` fail as unavailable.
struct Upstream {
    tables: Mutex<HashMap<String, Table>>,
    down: Mutex<Vec<String>>,
}

impl Upstream {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(HashMap::new()),
            down: Mutex::new(Vec::new()),
        })
    }

    fn serve(&self, subject: &str, table: Table) {
        self.tables.lock().unwrap().insert(subject.into(), table);
    }

    fn serve_at(&self, endpoint: &str, subject: &str, table: Table) {
        self.serve(&format!("{endpoint}/{subject}"), table);
    }

    fn fail(&self, subject: &str) {
        self.down.lock().unwrap().push(subject.into());
    }
}

impl UpstreamSource for Upstream {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Table, DataError> {
        if self.down.lock().unwrap().contains(&request.subject) {
            return Err(DataError::unavailable("scripted", "connection reset"));
        }
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(&format!("{}/{}", request.endpoint, request.subject))
            .or_else(|| tables.get(&request.subject))
            .cloned()
            .unwrap_or_default())
    }
}

/// Re-registers 600519.SH under a different market mid-fetch, which the
/// registry refuses as a duplicate.
struct Reregistering {
    registry: SymbolRegistry,
}

impl UpstreamSource for Reregistering {
    fn name(&self) -> &str {
        "reregistering"
    }

    fn fetch(&self, _request: &FetchRequest) -> Result<Table, DataError> {
        self.registry.register("600519.SH", Market::Hk, "HKD")?;
        Ok(Table::default())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()
}

fn prices(last: NaiveDate, closes: &[f64]) -> Table {
    let mut t = Table::new(
        ["date", "open", "high", "low", "close", "volume"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    let n = closes.len() as i64;
    for (i, close) in closes.iter().enumerate() {
        let date = last - Duration::days(n - 1 - i as i64);
        t.push_row(vec![
            Cell::Text(date.to_string()),
            Cell::Number(close - 0.5),
            Cell::Number(close + 1.0),
            Cell::Number(close - 1.0),
            Cell::Number(*close),
            Cell::Number(10_000.0),
        ]);
    }
    t
}

fn industry_pe() -> Table {
    let mut t = Table::new(vec!["date".into(), "industry".into(), "industry_pe".into()]);
    t.push_row(vec![
        Cell::Text("2026-02-26".into()),
        Cell::Text("semiconductors".into()),
        Cell::Number(42.5),
    ]);
    t
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 27, 18, 0, 0).unwrap()))
}

struct Harness {
    _dir: tempfile::TempDir,
    upstream: Arc<Upstream>,
    pipeline: Pipeline,
}

fn harness(configure: impl FnOnce(&mut PipelineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let upstream = Upstream::new();
    let pipeline = build_pipeline(
        dir.path(),
        Database::open_in_memory().unwrap(),
        upstream.clone(),
        configure,
    );
    Harness {
        _dir: dir,
        upstream,
        pipeline,
    }
}

/// Pipeline over `db` with every route served by `source`, artifacts under
/// `root`, and 600519.SH / 00700.HK registered.
fn build_pipeline(
    root: &Path,
    db: Database,
    source: Arc<dyn UpstreamSource>,
    configure: impl FnOnce(&mut PipelineConfig),
) -> Pipeline {
    let mut config = PipelineConfig::default();
    config.paths.cache_root = root.join("cache");
    config.paths.report_root = root.join("reports");
    config.paths.normalized_root = root.join("normalized");
    config.retry = RetryPolicy::immediate(2);
    configure(&mut config);

    let router = SourceRouter::new()
        .route(Market::Cn, DatasetKind::PriceHistory, source.clone(), "cn_hist", SymbolFormat::LowerPrefixed)
        .route(Market::Hk, DatasetKind::PriceHistory, source.clone(), "hk_hist", SymbolFormat::Code)
        .route(Market::Cn, DatasetKind::MarketCap, source.clone(), "cn_market_cap", SymbolFormat::LowerPrefixed)
        .route(Market::Cn, DatasetKind::Financials, source.clone(), "cn_financials", SymbolFormat::LowerPrefixed)
        .aggregate("industry:", DatasetKind::IndustryPe, source, "industry_pe");

    let services = Services::assemble(&config, db, router, clock());
    services.registry.register("600519.SH", Market::Cn, "CNY").unwrap();
    services.registry.register("00700.HK", Market::Hk, "HKD").unwrap();
    Pipeline::new(services, config)
}

fn request() -> RunRequest {
    RunRequest::for_date(run_date(), 30)
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn missing_fx_rate_marks_conversion_unavailable_but_succeeds() {
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1712.5, 1698.0]));
    h.upstream.serve("00700", prices(run_date(), &[380.0, 385.2, 390.4]));

    let summary = h.pipeline.run(&request(), &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::AllSuccess);
    assert_eq!(ExitPolicy::default().exit_code(summary.status), 0);

    let records = h.pipeline.services().ledger.run_records(run_date()).unwrap();
    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.status == JobStatus::Success));

    let reports = &h.pipeline.config().paths.report_root;
    let cn: serde_json::Value =
        serde_json::from_slice(&fs::read(reports.join("2026-02-27/600519_SH/summary.json")).unwrap()).unwrap();
    assert_eq!(cn["last_close_converted"], 1698.0);
    assert_eq!(cn["fx_gap_rows"], 0);

    let hk: serde_json::Value =
        serde_json::from_slice(&fs::read(reports.join("2026-02-27/00700_HK/summary.json")).unwrap()).unwrap();
    assert_eq!(hk["last_close_converted"], "unavailable");
    assert_eq!(hk["fx_gap_rows"], 3);

    let csv = fs::read_to_string(
        h.pipeline
            .config()
            .paths
            .normalized_root
            .join("2026-02-27/00700_HK/price_history.csv"),
    )
    .unwrap();
    assert!(csv.lines().next().unwrap().contains("close_cny"));
    assert!(csv.contains("unavailable"));

    let hk_outcome = summary.outcome("00700.HK").unwrap();
    assert!(hk_outcome.succeeded);
    assert!(hk_outcome.warnings.iter().any(|w| w.contains("HKD->CNY")));
}

#[test]
fn fx_rate_populates_converted_columns() {
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.upstream.serve("00700", prices(run_date(), &[380.0, 390.0]));
    let fx = &h.pipeline.services().fx;
    for offset in 0..2 {
        fx.upsert(run_date() - Duration::days(offset), "HKD", "CNY", 0.92, "manual")
            .unwrap();
    }

    let summary = h.pipeline.run(&request(), &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::AllSuccess);
    let hk: serde_json::Value = serde_json::from_slice(
        &fs::read(h.pipeline.config().paths.report_root.join("2026-02-27/00700_HK/summary.json")).unwrap(),
    )
    .unwrap();
    assert!((hk["last_close_converted"].as_f64().unwrap() - 358.8).abs() < 1e-9);
    assert_eq!(hk["fx_gap_rows"], 0);
}

#[test]
fn one_symbol_outage_does_not_block_others() {
    let h = harness(|_| {});
    h.upstream.fail("sh600519");
    h.upstream.serve("00700", prices(run_date(), &[380.0, 390.0]));

    let summary = h.pipeline.run(&request(), &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::PartialFailure);
    assert_eq!(ExitPolicy::default().exit_code(summary.status), 2);
    assert_eq!(
        ExitPolicy { allow_partial_success: true }.exit_code(summary.status),
        0
    );

    let failed = summary.outcome("600519.SH").unwrap();
    assert_eq!(failed.failed_stage, Some(Stage::Fetch));
    assert!(failed.error.as_deref().unwrap().starts_with("UpstreamUnavailable:"));

    let ledger = &h.pipeline.services().ledger;
    let records = ledger.run_records(run_date()).unwrap();
    let cn: Vec<_> = records.iter().filter(|r| r.symbol_id == "600519.SH").collect();
    assert_eq!(cn.len(), 4);
    assert_eq!(cn[0].status, JobStatus::Failed);
    assert!(cn[1..].iter().all(|r| r.status == JobStatus::Skipped));
    assert_eq!(cn[1].error_detail.as_deref(), Some("skipped: fetch failed"));

    let hk: Vec<_> = records.iter().filter(|r| r.symbol_id == "00700.HK").collect();
    assert_eq!(hk.len(), 4);
    assert!(hk.iter().all(|r| r.status == JobStatus::Success));

    assert_eq!(derive_run_status(&records).status, summary.status);
}

#[test]
fn aggregate_without_snapshot_fails_fetch_stage() {
    let h = harness(|c| {
        c.aggregates
            .insert("600519.SH".into(), vec!["industry:semiconductors".into()]);
    });
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.upstream.fail("industry:semiconductors");

    let req = request().with_symbols(vec!["600519.SH".into()]);
    let summary = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::TotalFailure);

    let fetch = h
        .pipeline
        .services()
        .ledger
        .history(&HistoryQuery {
            symbol_id: Some("600519.SH".into()),
            stage: Some(Stage::Fetch),
            limit: 10,
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(fetch.len(), 1);
    assert_eq!(fetch[0].status, JobStatus::Failed);
    assert!(fetch[0]
        .error_detail
        .as_deref()
        .unwrap()
        .starts_with("NoDataAvailableError:"));
}

#[test]
fn aggregate_snapshot_survives_later_outage() {
    let h = harness(|c| {
        c.aggregates
            .insert("600519.SH".into(), vec!["industry:semiconductors".into()]);
    });
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.upstream.serve("industry:semiconductors", industry_pe());
    let req = request().with_symbols(vec!["600519.SH".into()]);

    let first = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(first.status, RunStatus::AllSuccess);

    h.upstream.fail("industry:semiconductors");
    let second = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(second.status, RunStatus::AllSuccess);
    assert!(second.outcomes[0]
        .warnings
        .iter()
        .any(|w| w.contains("using snapshot")));

    let summary: serde_json::Value = serde_json::from_slice(
        &fs::read(h.pipeline.config().paths.report_root.join("2026-02-27/600519_SH/summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["aggregates"][0]["is_fallback"], true);
    assert_eq!(summary["aggregates"][0]["latest"]["industry_pe"], "42.5");
}

#[test]
fn reruns_append_ledger_rows_and_rewrite_identical_reports() {
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1712.5, 1698.0]));
    h.upstream.serve("00700", prices(run_date(), &[380.0, 385.2]));

    let report = h
        .pipeline
        .config()
        .paths
        .report_root
        .join("2026-02-27/600519_SH/report.md");
    h.pipeline.run(&request(), &NoProgress).unwrap();
    let first = fs::read(&report).unwrap();
    h.pipeline.run(&request(), &NoProgress).unwrap();
    let second = fs::read(&report).unwrap();
    assert_eq!(first, second);

    let history = h
        .pipeline
        .services()
        .ledger
        .history(&HistoryQuery {
            run_date: Some(run_date()),
            symbol_id: Some("600519.SH".into()),
            stage: Some(Stage::Fetch),
            limit: 10,
        })
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_ne!(history[0].job_id, history[1].job_id);

    let artifacts = h
        .pipeline
        .services()
        .artifacts
        .for_run(run_date(), "600519.SH")
        .unwrap();
    let kinds: Vec<_> = artifacts.iter().map(|a| a.kind.as_str()).collect();
    assert_eq!(kinds, ["chart", "report", "summary"]);
}

#[test]
fn strict_mode_fails_stale_data() {
    let stale_day = run_date() - Duration::days(90);
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(stale_day, &[1700.0, 1710.0]));
    let req = request().with_symbols(vec!["600519.SH".into()]);

    let lenient = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(lenient.status, RunStatus::AllSuccess);
    assert!(lenient.outcomes[0].warnings.iter().any(|w| w.contains("is stale")));

    let strict = h
        .pipeline
        .run(&RunRequest { strict: true, ..req }, &NoProgress)
        .unwrap();
    assert_eq!(strict.status, RunStatus::TotalFailure);
    assert_eq!(strict.outcomes[0].failed_stage, Some(Stage::Normalize));
    assert!(strict.outcomes[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("StaleDataError:"));
}

#[test]
fn empty_upstream_result_is_no_data() {
    let h = harness(|_| {});
    let summary = h
        .pipeline
        .run(&request().with_symbols(vec!["600519.SH".into()]), &NoProgress)
        .unwrap();
    assert_eq!(summary.status, RunStatus::TotalFailure);
    assert!(summary.outcomes[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("NoDataAvailableError:"));
}

#[test]
fn parallel_workers_match_sequential_outcome() {
    let h = harness(|c| c.workers = 4);
    h.upstream.fail("sh600519");
    h.upstream.serve("00700", prices(run_date(), &[380.0, 390.0]));
    for id in ["000001.SZ", "601318.SH"] {
        h.pipeline
            .services()
            .registry
            .register(id, Market::Cn, "CNY")
            .unwrap();
    }
    h.upstream.serve("sz000001", prices(run_date(), &[11.0, 11.2]));
    h.upstream.serve("sh601318", prices(run_date(), &[45.0, 44.1]));

    let summary = h.pipeline.run(&request(), &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::PartialFailure);
    assert_eq!((summary.succeeded, summary.failed), (3, 1));

    let records = h.pipeline.services().ledger.run_records(run_date()).unwrap();
    assert_eq!(records.len(), 16);
    assert!(records.iter().all(|r| r.status != JobStatus::Started));
}

#[test]
fn unregistered_symbols_are_ignored() {
    let h = harness(|_| {});
    h.upstream.serve("00700", prices(run_date(), &[380.0, 390.0]));
    let req = request().with_symbols(vec![
        "00700.HK".into(),
        "300750.SZ".into(),
        "bogus".into(),
        "贵州茅台".into(),
    ]);
    let summary = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.ignored, ["300750.SZ", "bogus", "贵州茅台"]);

    let none = request().with_symbols(vec!["300750.SZ".into()]);
    assert!(matches!(
        h.pipeline.run(&none, &NoProgress),
        Err(PipelineError::NoSymbols)
    ));
}

#[test]
fn run_summary_files_are_written() {
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.upstream.fail("00700");

    let summary = h.pipeline.run(&request(), &NoProgress).unwrap();
    assert_eq!(summary.summary_files.len(), 2);
    let md = fs::read_to_string(&summary.summary_files[1]).unwrap();
    assert!(md.contains("Status: **partial_failure** (1 succeeded, 1 failed)"));
    assert!(md.contains("| 00700.HK | failed | fetch |"));
    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(&summary.summary_files[0]).unwrap()).unwrap();
    assert_eq!(json["status"], "partial_failure");
}

#[test]
fn inverted_range_is_rejected() {
    let h = harness(|_| {});
    let mut req = request();
    req.range.start = run_date() + Duration::days(1);
    assert!(matches!(
        h.pipeline.run(&req, &NoProgress),
        Err(PipelineError::InvalidRange { .. })
    ));
}

#[test]
fn health_and_history_read_the_run() {
    let h = harness(|_| {});
    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.upstream.fail("00700");
    h.pipeline.run(&request(), &NoProgress).unwrap();

    let services = h.pipeline.services();
    let now = services.clock.now() + Duration::hours(1);
    let report =
        fundwise_runner::evaluate_health(&services.registry, &services.ledger, 36.0, Duration::hours(6), now)
            .unwrap();
    assert!(!report.is_healthy());
    let unhealthy: Vec<_> = report.unhealthy().map(|s| s.symbol_id.as_str()).collect();
    assert_eq!(unhealthy, ["00700.HK"]);

    let records = services.ledger.history(&HistoryQuery::latest(50)).unwrap();
    let runs = fundwise_runner::run_overviews(&services.ledger, &records).unwrap();
    let md = fundwise_runner::render_history_markdown(&records, &runs, Some(&report), now, Duration::hours(6));
    assert!(md.contains("| 2026-02-27 | partial_failure | 1 | 1 |"));
    assert!(md.contains("| 00700.HK | never_succeeded |"));
    assert!(md.contains("skipped: fetch failed"));
}

#[test]
fn rerun_with_short_history_drops_stale_chart() {
    let h = harness(|_| {});
    let req = request().with_symbols(vec!["600519.SH".into()]);
    let svg = h
        .pipeline
        .config()
        .paths
        .report_root
        .join("2026-02-27/600519_SH/price.svg");

    h.upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    h.pipeline.run(&req, &NoProgress).unwrap();
    assert!(svg.exists());

    h.upstream.serve("sh600519", prices(run_date(), &[1710.0]));
    let summary = h.pipeline.run(&req, &NoProgress).unwrap();
    assert_eq!(summary.status, RunStatus::AllSuccess);
    assert!(!svg.exists());
    assert!(!summary.outcomes[0].artifacts.contains(&svg));

    let kinds: Vec<_> = h
        .pipeline
        .services()
        .artifacts
        .for_run(run_date(), "600519.SH")
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds, ["report", "summary"]);
}

#[test]
fn contract_violation_aborts_after_failed_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let source = Arc::new(Reregistering {
        registry: SymbolRegistry::new(db.clone(), clock()),
    });
    let pipeline = build_pipeline(dir.path(), db, source, |_| {});

    let req = request().with_symbols(vec!["600519.SH".into(), "00700.HK".into()]);
    match pipeline.run(&req, &NoProgress) {
        Err(PipelineError::Contract { symbol_id, detail }) => {
            assert_eq!(symbol_id, "600519.SH");
            assert!(detail.starts_with("StoreError:"), "{detail}");
        }
        other => panic!("expected a contract violation, got {other:?}"),
    }

    let services = pipeline.services();
    let records = services.ledger.run_records(run_date()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].symbol_id, "600519.SH");
    assert_eq!(records[0].stage, Stage::Fetch);
    assert_eq!(records[0].status, JobStatus::Failed);
    assert!(records[0]
        .error_detail
        .as_deref()
        .unwrap()
        .starts_with("StoreError:"));

    let kept = services.registry.get("600519.SH").unwrap().unwrap();
    assert_eq!(kept.market, Market::Cn);
    assert!(!pipeline
        .config()
        .paths
        .report_root
        .join("2026-02-27/pipeline-summary-2026-02-27.json")
        .exists());
}

#[test]
fn ledger_write_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("meta.db");
    let upstream = Upstream::new();
    upstream.serve("sh600519", prices(run_date(), &[1700.0, 1710.0]));
    upstream.serve("00700", prices(run_date(), &[380.0, 390.0]));
    let pipeline = build_pipeline(dir.path(), Database::open(&db_path).unwrap(), upstream, |_| {});

    // 00700.HK sorts first; its normalize row can never be inserted.
    rusqlite::Connection::open(&db_path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_hk_normalize BEFORE INSERT ON data_jobs
             WHEN NEW.symbol_id = '00700.HK' AND NEW.stage = 'normalize'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .unwrap();

    let result = pipeline.run(&request(), &NoProgress);
    assert!(matches!(result, Err(PipelineError::Store(_))), "{result:?}");

    let records = pipeline.services().ledger.run_records(run_date()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].symbol_id, "00700.HK");
    assert_eq!(records[0].stage, Stage::Fetch);
    assert_eq!(records[0].status, JobStatus::Success);
    assert!(!pipeline
        .config()
        .paths
        .report_root
        .join("2026-02-27/pipeline-summary-2026-02-27.json")
        .exists());
}

fn market_cap() -> Table {
    let mut t = Table::new(vec!["date".into(), "总市值".into()]);
    t.push_row(vec![Cell::Text("2026-02-27".into()), Cell::Number(2.0e12)]);
    t
}

fn financials() -> Table {
    let mut t = Table::new(
        ["date", "revenue", "net_profit", "operating_cash_flow", "roe", "debt_to_asset"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for (date, revenue, profit, ocf, roe, debt) in [
        ("2024-12-31", 1.5e11, 7.5e10, 9.0e10, 0.30, 0.20),
        ("2025-12-31", 1.8e11, 9.0e10, 1.0e11, 0.31, 0.19),
    ] {
        t.push_row(vec![
            Cell::Text(date.into()),
            Cell::Number(revenue),
            Cell::Number(profit),
            Cell::Number(ocf),
            Cell::Number(roe),
            Cell::Number(debt),
        ]);
    }
    t
}

#[test]
fn fundamentals_feed_watchlist_and_market_panel() {
    let h = harness(|c| {
        c.datasets = vec![DatasetKind::PriceHistory, DatasetKind::MarketCap, DatasetKind::Financials];
    });
    h.upstream.serve("sh600519", prices(run_date(), &[1600.0, 1700.0]));
    h.upstream.serve_at("cn_market_cap", "sh600519", market_cap());
    h.upstream.serve_at("cn_financials", "sh600519", financials());

    let summary = h
        .pipeline
        .run(&request().with_symbols(vec!["600519.SH".into()]), &NoProgress)
        .unwrap();
    assert_eq!(summary.status, RunStatus::AllSuccess);

    let reports = &h.pipeline.config().paths.report_root;
    let dossier: serde_json::Value =
        serde_json::from_slice(&fs::read(reports.join("2026-02-27/600519_SH/summary.json")).unwrap()).unwrap();
    let f = &dossier["fundamentals"];
    assert_eq!(f["as_of"], "2026-02-27");
    assert_eq!(f["market_cap_converted"], 2.0e12);
    assert!((f["revenue_yoy"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    assert!((f["ocf_to_profit"].as_f64().unwrap() - 1.0e11 / 9.0e10).abs() < 1e-9);
    let report = fs::read_to_string(reports.join("2026-02-27/600519_SH/report.md")).unwrap();
    assert!(report.contains("## Fundamentals"));

    assert_eq!(summary.watchlist.len(), 1);
    let score = &summary.watchlist[0];
    assert_eq!(score.symbol_id, "600519.SH");
    assert_eq!(score.tier, fundwise_runner::Tier::B);
    assert!(score.total > 74.0 && score.total < 75.5, "{}", score.total);

    let panel = summary.market_panel.as_ref().unwrap();
    assert_eq!(panel.breadth, Some(1.0));
    assert_eq!(panel.state, fundwise_runner::MarketState::RiskOn);

    let md = fs::read_to_string(&summary.summary_files[1]).unwrap();
    assert!(md.contains("## Market panel"));
    assert!(md.contains("State: **risk_on**"));
    assert!(md.contains("| 1 | 600519.SH |"));
    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(&summary.summary_files[0]).unwrap()).unwrap();
    assert_eq!(json["watchlist"][0]["tier"], "B");
    assert_eq!(json["market_panel"]["state"], "risk_on");
}
