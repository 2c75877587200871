//! Minimal SVG line chart of close prices.
//!
//! Coordinates are printed with fixed precision so the same series always
//! renders to the same bytes.

use fundwise_core::data::{Cell, Table};

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 280.0;
const PAD: f64 = 40.0;

/// `None` when the table has fewer than two numeric closes.
pub fn price_chart_svg(title: &str, prices: &Table) -> Option<String> {
    let points: Vec<(String, f64)> = prices
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, _)| {
            let close = prices.cell(i, "close")?.as_f64()?;
            let label = prices
                .cell(i, "date")
                .and_then(Cell::as_date)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            Some((label, close))
        })
        .collect();
    if points.len() < 2 {
        return None;
    }

    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, v)| {
            (lo.min(*v), hi.max(*v))
        });
    let span = if hi - lo > f64::EPSILON { hi - lo } else { 1.0 };
    let step = (WIDTH - 2.0 * PAD) / (points.len() - 1) as f64;

    let polyline = points
        .iter()
        .enumerate()
        .map(|(i, (_, v))| {
            let x = PAD + step * i as f64;
            let y = HEIGHT - PAD - (v - lo) / span * (HEIGHT - 2.0 * PAD);
            format!("{x:.1},{y:.1}")
        })
        .collect::<Vec<_>>()
        .join(" ");

    let first = &points[0].0;
    let last = &points[points.len() - 1].0;
    let title = escape_xml(title);

    Some(format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">
  <rect width="100%" height="100%" fill="#ffffff"/>
  <text x="{PAD}" y="24" font-family="sans-serif" font-size="14">{title} close</text>
  <line x1="{PAD}" y1="{base}" x2="{right}" y2="{base}" stroke="#999999"/>
  <line x1="{PAD}" y1="{PAD}" x2="{PAD}" y2="{base}" stroke="#999999"/>
  <text x="4" y="{top_label}" font-family="sans-serif" font-size="10">{hi:.2}</text>
  <text x="4" y="{base}" font-family="sans-serif" font-size="10">{lo:.2}</text>
  <text x="{PAD}" y="{date_y}" font-family="sans-serif" font-size="10">{first}</text>
  <text x="{right}" y="{date_y}" font-family="sans-serif" font-size="10" text-anchor="end">{last}</text>
  <polyline fill="none" stroke="#1f77b4" stroke-width="1.5" points="{polyline}"/>
</svg>
"##,
        base = HEIGHT - PAD,
        right = WIDTH - PAD,
        top_label = PAD + 4.0,
        date_y = HEIGHT - PAD + 16.0,
    ))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn table(closes: &[f64]) -> Table {
        let mut t = Table::new(vec!["date".into(), "close".into()]);
        for (i, c) in closes.iter().enumerate() {
            t.push_row(vec![
                Cell::Date(NaiveDate::from_ymd_opt(2026, 2, i as u32 + 1).unwrap()),
                Cell::Number(*c),
            ]);
        }
        t
    }

    #[test]
    fn needs_two_points() {
        assert!(price_chart_svg("x", &table(&[1.0])).is_none());
    }

    #[test]
    fn renders_deterministically() {
        let t = table(&[10.0, 12.0, 11.0]);
        let a = price_chart_svg("600519.SH", &t).unwrap();
        let b = price_chart_svg("600519.SH", &t).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("<polyline"));
        assert!(a.contains("2026-02-01"));
        assert!(a.contains("2026-02-03"));
    }

    #[test]
    fn flat_series_does_not_divide_by_zero() {
        let svg = price_chart_svg("flat", &table(&[5.0, 5.0])).unwrap();
        assert!(!svg.contains("NaN"));
    }
}
