//! Markdown rendering for symbol reports and run summaries.

use std::fmt::Write;

use crate::metrics::{Converted, SymbolMetrics};
use crate::pipeline::RunSummary;

pub(crate) const NA: &str = "N/A";

/// Make a value safe inside a Markdown table cell.
pub(crate) fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| format!("{:.2}%", v * 100.0))
}

fn num(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| format!("{v:.2}"))
}

pub fn render_symbol_report(m: &SymbolMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} daily report\n", m.symbol_id);
    let _ = writeln!(out, "- Run date: {}", m.run_date);
    let _ = writeln!(out, "- Currency: {} (target {})", m.currency, m.target_currency);
    let window = match (m.first_date, m.last_date) {
        (Some(first), Some(last)) => format!("{first} to {last}"),
        _ => NA.to_string(),
    };
    let _ = writeln!(out, "- Observations: {} ({window})\n", m.observations);

    let _ = writeln!(out, "## Price metrics\n");
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Last close ({}) | {} |", m.currency, num(m.last_close));
    let converted = m
        .last_close_converted
        .map_or_else(|| NA.to_string(), |c| c.to_string());
    let _ = writeln!(out, "| Last close ({}) | {converted} |", m.target_currency);
    let _ = writeln!(out, "| Total return | {} |", pct(m.total_return));
    let _ = writeln!(out, "| Max drawdown | {} |", pct(m.max_drawdown));
    let _ = writeln!(out, "| Annualized volatility | {} |", pct(m.annualized_volatility));
    let _ = writeln!(out, "| FX gap rows | {} |", m.fx_gap_rows);

    let f = &m.fundamentals;
    if !f.is_empty() {
        let money = |native: Option<f64>, converted: Option<Converted>| {
            let converted = converted.map_or_else(|| NA.to_string(), |c| c.to_string());
            format!("{} | {converted}", num(native))
        };
        let _ = writeln!(out, "\n## Fundamentals\n");
        let as_of = f.as_of.map_or_else(|| NA.to_string(), |d| d.to_string());
        let _ = writeln!(out, "As of {as_of}.\n");
        let _ = writeln!(out, "| Metric | {} | {} |", m.currency, m.target_currency);
        let _ = writeln!(out, "|---|---|---|");
        let _ = writeln!(out, "| Market cap | {} |", money(f.market_cap, f.market_cap_converted));
        let _ = writeln!(out, "| Revenue | {} |", money(f.revenue, f.revenue_converted));
        let _ = writeln!(out, "| Net profit | {} |", money(f.net_profit, f.net_profit_converted));
        let _ = writeln!(
            out,
            "| Operating cash flow | {} |",
            money(f.operating_cash_flow, f.operating_cash_flow_converted)
        );
        let _ = writeln!(out, "\n| Ratio | Value |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| Revenue growth | {} |", pct(f.revenue_yoy));
        let _ = writeln!(out, "| Net profit growth | {} |", pct(f.net_profit_yoy));
        let _ = writeln!(out, "| OCF / net profit | {} |", num(f.ocf_to_profit));
        let _ = writeln!(out, "| ROE | {} |", num(f.roe));
        let _ = writeln!(out, "| Debt to asset | {} |", num(f.debt_to_asset));
    }

    if !m.aggregates.is_empty() {
        let _ = writeln!(out, "\n## Aggregates\n");
        let _ = writeln!(out, "| Dataset | Origin | Rows | Latest |");
        let _ = writeln!(out, "|---|---|---|---|");
        for agg in &m.aggregates {
            let origin = if agg.is_fallback { "fallback snapshot" } else { "live" };
            let latest = if agg.latest.is_empty() {
                NA.to_string()
            } else {
                agg.latest
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(
                out,
                "| {} | {origin} | {} | {} |",
                escape_cell(&agg.dataset_key),
                agg.rows,
                escape_cell(&latest)
            );
        }
    }

    if !m.warnings.is_empty() {
        let _ = writeln!(out, "\n## Warnings\n");
        for warning in &m.warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }
    out
}

pub fn render_run_summary(s: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Pipeline summary {}\n", s.run_date);
    let _ = writeln!(
        out,
        "Status: **{}** ({} succeeded, {} failed)\n",
        s.status.as_str(),
        s.succeeded,
        s.failed
    );
    let _ = writeln!(out, "| Symbol | Result | Failed stage | Detail |");
    let _ = writeln!(out, "|---|---|---|---|");
    for o in &s.outcomes {
        let result = if o.succeeded { "success" } else { "failed" };
        let stage = o.failed_stage.map_or(NA, |st| st.as_str());
        let detail = o.error.as_deref().unwrap_or(NA);
        let _ = writeln!(
            out,
            "| {} | {result} | {stage} | {} |",
            o.symbol_id,
            escape_cell(detail)
        );
    }

    if let Some(p) = &s.market_panel {
        let _ = writeln!(out, "\n## Market panel\n");
        let breadth = p.breadth.map_or_else(|| NA.to_string(), |b| format!("{:.2}%", b * 100.0));
        let _ = writeln!(
            out,
            "State: **{}**, temperature {:.2}, suggested position {} ({} symbols, breadth {breadth})\n",
            p.state.as_str(),
            p.risk_temperature,
            p.position_range,
            p.sample_size
        );
        for note in &p.notes {
            let _ = writeln!(out, "- {note}");
        }
    }

    if !s.watchlist.is_empty() {
        let _ = writeln!(out, "\n## Watchlist\n");
        let _ = writeln!(out, "| Rank | Symbol | Total | Tier | Growth | Quality | Valuation | Momentum |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
        for (rank, w) in s.watchlist.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {:.2} | {} | {:.2} | {:.2} | {:.2} | {:.2} |",
                rank + 1,
                w.symbol_id,
                w.total,
                w.tier.as_str(),
                w.factors.growth,
                w.factors.quality,
                w.factors.valuation,
                w.factors.momentum
            );
        }
        for w in s.watchlist.iter().filter(|w| !w.notes.is_empty()) {
            let _ = writeln!(out, "\n{}:", w.symbol_id);
            for note in &w.notes {
                let _ = writeln!(out, "- {note}");
            }
        }
    }

    if !s.ignored.is_empty() {
        let _ = writeln!(out, "\n## Ignored symbols\n");
        for symbol in &s.ignored {
            let _ = writeln!(out, "- {symbol}");
        }
    }

    let warnings: Vec<(&str, &str)> = s
        .outcomes
        .iter()
        .flat_map(|o| o.warnings.iter().map(move |w| (o.symbol_id.as_str(), w.as_str())))
        .collect();
    if !warnings.is_empty() {
        let _ = writeln!(out, "\n## Warnings\n");
        for (symbol, warning) in warnings {
            let _ = writeln!(out, "- {symbol}: {warning}");
        }
    }

    let files: Vec<_> = s.outcomes.iter().flat_map(|o| o.artifacts.iter()).collect();
    if !files.is_empty() {
        let _ = writeln!(out, "\n## Generated files\n");
        for path in files {
            let _ = writeln!(out, "- {}", path.display());
        }
    }
    out
}
