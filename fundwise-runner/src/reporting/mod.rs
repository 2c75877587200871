//! Report artifacts: per-symbol report directories and run summary files.
//!
//! Paths are pure functions of `(report_root, run_date, symbol_id)` and file
//! content carries no wall-clock timestamps, so regenerating a report with the
//! same inputs rewrites identical bytes. Every file is written atomically
//! (tmp + rename).

pub mod chart;
pub mod markdown;

use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fundwise_core::data::Table;
use fundwise_core::domain::symbol_dir_name;

use crate::metrics::SymbolMetrics;
use crate::pipeline::RunSummary;

/// One file produced by the report stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenArtifact {
    /// `report`, `summary`, `chart`, ...
    pub kind: String,
    pub path: PathBuf,
    /// blake3 of the file content.
    pub checksum: String,
}

/// `<report_root>/<run_date>/<SYMBOL_DIR>`
pub fn symbol_report_dir(report_root: &Path, run_date: NaiveDate, symbol_id: &str) -> PathBuf {
    report_root
        .join(run_date.format("%Y-%m-%d").to_string())
        .join(symbol_dir_name(symbol_id))
}

/// Write `bytes` to `path` via a sibling tmp file, creating parent dirs.
/// Returns the content checksum.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, bytes)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(blake3::hash(bytes).to_hex().to_string())
}

fn write_artifact(dir: &Path, kind: &str, file_name: &str, bytes: &[u8]) -> io::Result<WrittenArtifact> {
    let path = dir.join(file_name);
    let checksum = write_atomic(&path, bytes)?;
    Ok(WrittenArtifact {
        kind: kind.to_string(),
        path,
        checksum,
    })
}

/// Write `report.md`, `summary.json` and, when a price series with at least
/// two closes exists, `price.svg`. Without a chart any `price.svg` left by an
/// earlier run of the same date is removed.
pub fn write_symbol_report(
    report_root: &Path,
    metrics: &SymbolMetrics,
    prices: Option<&Table>,
) -> io::Result<Vec<WrittenArtifact>> {
    let dir = symbol_report_dir(report_root, metrics.run_date, &metrics.symbol_id);
    let mut written = Vec::new();

    let summary = serde_json::to_vec_pretty(metrics).map_err(io::Error::other)?;
    written.push(write_artifact(&dir, "summary", "summary.json", &summary)?);

    let report = markdown::render_symbol_report(metrics);
    written.push(write_artifact(&dir, "report", "report.md", report.as_bytes())?);

    match prices.and_then(|t| chart::price_chart_svg(&metrics.symbol_id, t)) {
        Some(svg) => written.push(write_artifact(&dir, "chart", "price.svg", svg.as_bytes())?),
        None => remove_if_present(&dir.join("price.svg"))?,
    }
    Ok(written)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write `pipeline-summary-<run_date>.json` and `.md` under
/// `<report_root>/<run_date>/`.
pub fn write_run_summary(report_root: &Path, summary: &RunSummary) -> io::Result<Vec<PathBuf>> {
    let date = summary.run_date.format("%Y-%m-%d").to_string();
    let dir = report_root.join(&date);

    let json_path = dir.join(format!("pipeline-summary-{date}.json"));
    let json = serde_json::to_vec_pretty(summary).map_err(io::Error::other)?;
    write_atomic(&json_path, &json)?;

    let md_path = dir.join(format!("pipeline-summary-{date}.md"));
    write_atomic(&md_path, markdown::render_run_summary(summary).as_bytes())?;

    Ok(vec![json_path, md_path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_dir_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        assert_eq!(
            symbol_report_dir(Path::new("reports"), date, "600519.SH"),
            PathBuf::from("reports/2026-02-27/600519_SH")
        );
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        let first = write_atomic(&path, b"one").unwrap();
        let second = write_atomic(&path, b"two").unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("nested/out.txt.tmp").exists());
    }

    #[test]
    fn symbol_report_is_byte_identical_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let metrics = SymbolMetrics::compute("600519.SH", date, "CNY", "CNY", None);

        let first = write_symbol_report(dir.path(), &metrics, None).unwrap();
        let bytes: Vec<Vec<u8>> = first.iter().map(|a| fs::read(&a.path).unwrap()).collect();
        let second = write_symbol_report(dir.path(), &metrics, None).unwrap();

        assert_eq!(first, second);
        for (artifact, before) in second.iter().zip(bytes) {
            assert_eq!(fs::read(&artifact.path).unwrap(), before);
        }
        assert!(!second.iter().any(|a| a.kind == "chart"));
    }

    #[test]
    fn rerun_without_chart_removes_old_svg() {
        use fundwise_core::data::Cell;

        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let mut prices = Table::new(vec!["date".into(), "close".into()]);
        for (day, close) in [("2026-02-26", 1500.0), ("2026-02-27", 1512.5)] {
            prices.push_row(vec![Cell::Text(day.into()), Cell::Number(close)]);
        }
        let metrics = SymbolMetrics::compute("600519.SH", date, "CNY", "CNY", Some(&prices));
        let first = write_symbol_report(dir.path(), &metrics, Some(&prices)).unwrap();
        let svg = symbol_report_dir(dir.path(), date, "600519.SH").join("price.svg");
        assert!(first.iter().any(|a| a.kind == "chart"));
        assert!(svg.exists());

        let metrics = SymbolMetrics::compute("600519.SH", date, "CNY", "CNY", None);
        let second = write_symbol_report(dir.path(), &metrics, None).unwrap();
        assert!(!second.iter().any(|a| a.kind == "chart"));
        assert!(!svg.exists());
    }
}
