//! Fundwise CLI: daily pipeline, health check, history, and registry commands.
//!
//! Commands:
//! - `run-pipeline`: register the given symbols and run fetch → report
//! - `health-check`: flag symbols without a recent successful report
//! - `history-report`: Markdown overview of recent ledger rows
//! - `upsert-fx`: write one FX rate
//! - `symbols register|deactivate|list`: manage the symbol registry
//!
//! Exit codes: `run-pipeline` 0 / 2 (partial failure) / 3 (total failure);
//! `health-check` 0 / 2; any operational error 1.

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fundwise_core::clock::{Clock, SystemClock};
use fundwise_core::data::DateRange;
use fundwise_core::domain::{load_symbol_list, parse_symbol, JobStatus, Stage};
use fundwise_core::store::HistoryQuery;
use fundwise_runner::{
    evaluate_health, render_history_markdown, run_overviews, ExitPolicy, Pipeline,
    PipelineConfig, PipelineProgress, RunRequest, Services, SymbolOutcome,
};

#[derive(Parser)]
#[command(
    name = "fundwise",
    about = "Fundwise: daily fundamentals pipeline with an auditable job ledger"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `paths.db_path` from the config.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fetch → normalize → compute → report for each symbol.
    RunPipeline {
        /// Comma-separated symbols (e.g. 600519.SH,00700.HK).
        #[arg(long)]
        symbols: Option<String>,

        /// File with one symbol per line; `#` starts a comment.
        #[arg(long)]
        symbols_file: Option<PathBuf>,

        /// First date of the fetched history (YYYY-MM-DD).
        #[arg(long)]
        start_date: Option<String>,

        /// Last date of the fetched history. Defaults to the run date.
        #[arg(long)]
        end_date: Option<String>,

        /// Logical business date of this run. Defaults to today.
        #[arg(long)]
        run_date: Option<String>,

        /// Exit 0 on partial failure.
        #[arg(long, default_value_t = false)]
        allow_partial_success: bool,

        /// Fail the normalize stage on stale data.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Check hours since each active symbol's last successful report.
    HealthCheck {
        /// Threshold in hours. Defaults to `health.max_delay_hours`.
        #[arg(long)]
        max_delay_hours: Option<f64>,
    },
    /// Print recent ledger rows as Markdown.
    HistoryReport {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        run_date: Option<String>,

        #[arg(long)]
        symbol: Option<String>,

        /// Also write the report to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Insert or overwrite one FX rate (1 base = rate quote).
    UpsertFx {
        #[arg(long)]
        date: String,

        #[arg(long)]
        base: String,

        #[arg(long, default_value = "CNY")]
        quote: String,

        #[arg(long)]
        rate: f64,

        #[arg(long, default_value = "manual")]
        source: String,
    },
    /// Symbol registry commands.
    Symbols {
        #[command(subcommand)]
        action: SymbolsAction,
    },
}

#[derive(Subcommand)]
enum SymbolsAction {
    /// Register a symbol; market and currency are derived from its suffix.
    Register { symbol: String },
    /// Stop processing a symbol. Its ledger history is kept.
    Deactivate { symbol: String },
    /// List registered symbols.
    List {
        /// Include inactive symbols.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.db_path)?;

    match cli.command {
        Commands::RunPipeline {
            symbols,
            symbols_file,
            start_date,
            end_date,
            run_date,
            allow_partial_success,
            strict,
        } => run_pipeline_cmd(
            config,
            symbols,
            symbols_file,
            start_date,
            end_date,
            run_date,
            ExitPolicy {
                allow_partial_success,
            },
            strict,
        ),
        Commands::HealthCheck { max_delay_hours } => run_health_check(&config, max_delay_hours),
        Commands::HistoryReport {
            limit,
            run_date,
            symbol,
            output,
        } => run_history_report(&config, limit, run_date, symbol, output),
        Commands::UpsertFx {
            date,
            base,
            quote,
            rate,
            source,
        } => run_upsert_fx(&config, &date, &base, &quote, rate, &source),
        Commands::Symbols { action } => run_symbols(&config, action),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>, db_path: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    if let Some(db) = db_path {
        config.paths.db_path = db;
    }
    Ok(config)
}

fn parse_date(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{flag} must be YYYY-MM-DD, got '{value}'"))
}

fn open_services(config: &PipelineConfig) -> Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Services::open(config, clock)
        .with_context(|| format!("failed to open {}", config.paths.db_path.display()))
}

// ── run-pipeline ────────────────────────────────────────────────────

/// Prints one line per finished symbol.
struct StdoutProgress;

impl PipelineProgress for StdoutProgress {
    fn on_stage_complete(&self, symbol_id: &str, stage: Stage, status: JobStatus) {
        tracing::debug!(symbol_id, %stage, %status, "stage complete");
    }

    fn on_symbol_complete(&self, outcome: &SymbolOutcome) {
        match (&outcome.failed_stage, &outcome.error) {
            (Some(stage), Some(err)) => {
                println!("  [FAIL] {} at {stage}: {err}", outcome.symbol_id)
            }
            _ => println!(
                "  [ OK ] {} ({} warning(s))",
                outcome.symbol_id,
                outcome.warnings.len()
            ),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline_cmd(
    config: PipelineConfig,
    symbols: Option<String>,
    symbols_file: Option<PathBuf>,
    start_date: Option<String>,
    end_date: Option<String>,
    run_date: Option<String>,
    policy: ExitPolicy,
    strict: bool,
) -> Result<()> {
    let run_date = match run_date {
        Some(s) => parse_date(&s, "--run-date")?,
        None => chrono::Local::now().date_naive(),
    };
    let end = end_date
        .as_deref()
        .map(|s| parse_date(s, "--end-date"))
        .transpose()?
        .unwrap_or(run_date);
    let start = start_date
        .as_deref()
        .map(|s| parse_date(s, "--start-date"))
        .transpose()?
        .unwrap_or_else(|| end - Duration::days(config.lookback_days));
    if start > end {
        bail!("--start-date {start} is after --end-date {end}");
    }

    let requested = load_symbol_list(symbols.as_deref(), symbols_file.as_deref())?;
    let services = open_services(&config)?;

    let mut canonical = Vec::with_capacity(requested.len());
    for raw in &requested {
        let info = parse_symbol(raw)?;
        services
            .registry
            .register(&info.symbol_id, info.market, &info.currency)?;
        canonical.push(info.symbol_id);
    }

    let request = RunRequest {
        run_date,
        range: DateRange::new(start, end),
        symbols: (!canonical.is_empty()).then_some(canonical),
        strict,
    };

    println!("Pipeline run {run_date} ({start} to {end})");
    let pipeline = Pipeline::new(services, config);
    let summary = pipeline.run(&request, &StdoutProgress)?;

    println!();
    println!(
        "Status: {} ({} succeeded, {} failed)",
        summary.status.as_str(),
        summary.succeeded,
        summary.failed
    );
    for ignored in &summary.ignored {
        println!("Ignored: {ignored}");
    }
    if let Some(panel) = &summary.market_panel {
        println!(
            "Market: {} (temperature {:.2}, position {})",
            panel.state.as_str(),
            panel.risk_temperature,
            panel.position_range
        );
    }
    for (rank, score) in summary.watchlist.iter().enumerate() {
        println!("  {:>2}. {:<12} {:>6.2} {}", rank + 1, score.symbol_id, score.total, score.tier.as_str());
    }
    for path in &summary.summary_files {
        println!("Summary: {}", path.display());
    }

    let code = policy.exit_code(summary.status);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

// ── health-check / history-report ───────────────────────────────────

fn run_health_check(config: &PipelineConfig, max_delay_hours: Option<f64>) -> Result<()> {
    let services = open_services(config)?;
    let report = evaluate_health(
        &services.registry,
        &services.ledger,
        max_delay_hours.unwrap_or(config.health.max_delay_hours),
        Duration::hours(config.ledger.abandoned_grace_hours),
        services.clock.now(),
    )?;
    print!("{}", report.render_text());

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run_history_report(
    config: &PipelineConfig,
    limit: usize,
    run_date: Option<String>,
    symbol: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let services = open_services(config)?;
    let query = HistoryQuery {
        run_date: run_date
            .as_deref()
            .map(|s| parse_date(s, "--run-date"))
            .transpose()?,
        symbol_id: symbol.map(|s| s.trim().to_ascii_uppercase()),
        stage: None,
        limit,
    };
    let records = services.ledger.history(&query)?;
    let runs = run_overviews(&services.ledger, &records)?;

    let now = services.clock.now();
    let grace = Duration::hours(config.ledger.abandoned_grace_hours);
    let health = evaluate_health(
        &services.registry,
        &services.ledger,
        config.health.max_delay_hours,
        grace,
        now,
    )?;

    let markdown = render_history_markdown(&records, &runs, Some(&health), now, grace);
    print!("{markdown}");
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &markdown)
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("History report written to {}", path.display());
    }
    Ok(())
}

// ── upsert-fx / symbols ─────────────────────────────────────────────

fn run_upsert_fx(
    config: &PipelineConfig,
    date: &str,
    base: &str,
    quote: &str,
    rate: f64,
    source: &str,
) -> Result<()> {
    let date = parse_date(date, "--date")?;
    let services = open_services(config)?;
    let stored = services.fx.upsert(date, base, quote, rate, source)?;
    println!(
        "{} 1 {} = {} {} ({})",
        stored.date, stored.base_currency, stored.rate, stored.quote_currency, stored.source
    );
    Ok(())
}

fn run_symbols(config: &PipelineConfig, action: SymbolsAction) -> Result<()> {
    let services = open_services(config)?;
    let registry = &services.registry;

    match action {
        SymbolsAction::Register { symbol } => {
            let info = parse_symbol(&symbol)?;
            let stored = registry.register(&info.symbol_id, info.market, &info.currency)?;
            println!(
                "Registered {} ({} / {})",
                stored.symbol_id, stored.market, stored.currency
            );
        }
        SymbolsAction::Deactivate { symbol } => {
            let info = parse_symbol(&symbol)?;
            registry.deactivate(&info.symbol_id)?;
            println!("Deactivated {}", info.symbol_id);
        }
        SymbolsAction::List { all } => {
            let symbols = if all {
                registry.list_all()?
            } else {
                registry.list_active()?
            };
            if symbols.is_empty() {
                println!("No symbols registered.");
            }
            for s in symbols {
                let state = if s.active { "active" } else { "inactive" };
                println!("{:<12} {:<3} {:<4} {state}", s.symbol_id, s.market.as_str(), s.currency);
            }
        }
    }
    Ok(())
}
