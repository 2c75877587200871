//! Watchlist scoring and the market-timing panel, built from the metrics of
//! every symbol that completed a run.
//!
//! Each factor maps a raw figure linearly onto 0..=100 over a fixed band and
//! clips outside it; a missing figure scores a neutral 50. The panel takes
//! medians across the scored symbols and nudges them by price breadth.

use chrono::NaiveDate;
use serde::Serialize;

use crate::metrics::SymbolMetrics;

const NEUTRAL: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorScores {
    pub growth: f64,
    pub quality: f64,
    pub valuation: f64,
    pub momentum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    pub fn from_score(total: f64) -> Self {
        if total >= 80.0 {
            Tier::A
        } else if total >= 65.0 {
            Tier::B
        } else if total >= 50.0 {
            Tier::C
        } else {
            Tier::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistScore {
    pub symbol_id: String,
    pub total: f64,
    pub tier: Tier,
    pub factors: FactorScores,
    pub notes: Vec<String>,
    pub as_of: Option<NaiveDate>,
}

// ─── Watchlist ──────────────────────────────────────────────────────

/// Score one symbol. Weights: growth 35%, quality 35%, valuation 15%,
/// momentum 15%.
pub fn score_symbol(metrics: &SymbolMetrics) -> WatchlistScore {
    let f = &metrics.fundamentals;
    let growth = (map_range(f.revenue_yoy, -0.2, 0.4) + map_range(f.net_profit_yoy, -0.2, 0.4)) / 2.0;
    let quality = map_range(f.roe, 0.05, 0.25) * 0.45
        + map_range(f.ocf_to_profit, 0.5, 1.2) * 0.35
        + map_reverse_range(f.debt_to_asset, 0.2, 0.8) * 0.2;
    // Market cap over profit in the instrument's own currency; the ratio
    // does not depend on conversion.
    let valuation = match (f.market_cap, f.net_profit) {
        (Some(cap), Some(profit)) if profit > 0.0 => map_reverse_range(Some(cap / profit), 10.0, 60.0),
        (Some(_), Some(_)) => 30.0,
        _ => NEUTRAL,
    };
    let momentum = map_range(metrics.total_return, -0.2, 0.4);

    let total = growth * 0.35 + quality * 0.35 + valuation * 0.15 + momentum * 0.15;

    let mut notes = Vec::new();
    if growth >= 70.0 {
        notes.push("growth strong: revenue and profit growth in the upper band".to_string());
    } else if growth <= 40.0 {
        notes.push("growth weak: revenue or profit growth lagging".to_string());
    }
    if quality >= 70.0 {
        notes.push("quality strong: ROE, cash conversion or leverage look healthy".to_string());
    } else if quality <= 40.0 {
        notes.push("quality weak: ROE, cash conversion or leverage need work".to_string());
    }
    if momentum >= 65.0 {
        notes.push("momentum strong: price trending up over the window".to_string());
    } else if momentum <= 35.0 {
        notes.push("momentum weak: price trending down over the window".to_string());
    }
    if let (Some(profit), Some(ocf)) = (f.net_profit, f.operating_cash_flow) {
        if profit > 0.0 && ocf < 0.0 {
            notes.push("risk: positive net profit with negative operating cash flow".to_string());
        }
    }

    WatchlistScore {
        symbol_id: metrics.symbol_id.clone(),
        total: round2(total),
        tier: Tier::from_score(total),
        factors: FactorScores {
            growth: round2(growth),
            quality: round2(quality),
            valuation: round2(valuation),
            momentum: round2(momentum),
        },
        notes,
        as_of: f.as_of.or(metrics.last_date),
    }
}

/// Score every symbol and sort by total descending, ties by symbol id.
pub fn rank_watchlist<'a>(metrics: impl IntoIterator<Item = &'a SymbolMetrics>) -> Vec<WatchlistScore> {
    let mut scores: Vec<WatchlistScore> = metrics.into_iter().map(score_symbol).collect();
    scores.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| a.symbol_id.cmp(&b.symbol_id))
    });
    scores
}

// ─── Market panel ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    RiskOn,
    Neutral,
    Cautious,
}

impl MarketState {
    pub fn from_temperature(temperature: f64) -> Self {
        if temperature >= 65.0 {
            MarketState::RiskOn
        } else if temperature >= 45.0 {
            MarketState::Neutral
        } else {
            MarketState::Cautious
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::RiskOn => "risk_on",
            MarketState::Neutral => "neutral",
            MarketState::Cautious => "cautious",
        }
    }

    pub fn position_range(&self) -> &'static str {
        match self {
            MarketState::RiskOn => "60%-80%",
            MarketState::Neutral => "40%-60%",
            MarketState::Cautious => "20%-40%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketPanel {
    pub as_of: Option<NaiveDate>,
    pub sample_size: usize,
    pub risk_temperature: f64,
    pub state: MarketState,
    pub position_range: String,
    /// Share of symbols with a positive price return over the window.
    pub breadth: Option<f64>,
    pub median_total: f64,
    pub median_growth: f64,
    pub median_quality: f64,
    pub median_momentum: f64,
    pub notes: Vec<String>,
}

/// Build the panel from the scored watchlist and the metrics it was scored
/// from. `None` when nothing was scored.
pub fn market_panel(scores: &[WatchlistScore], metrics: &[&SymbolMetrics]) -> Option<MarketPanel> {
    if scores.is_empty() {
        return None;
    }
    let median_of = |pick: fn(&WatchlistScore) -> f64| median(scores.iter().map(pick).collect());
    let median_total = median_of(|s| s.total);
    let median_growth = median_of(|s| s.factors.growth);
    let median_quality = median_of(|s| s.factors.quality);
    let median_momentum = median_of(|s| s.factors.momentum);

    let returns: Vec<f64> = metrics.iter().filter_map(|m| m.total_return).collect();
    let breadth = (!returns.is_empty())
        .then(|| returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64);
    let temperature = match breadth {
        Some(b) => clip(median_total + (b - 0.5) * 20.0),
        None => clip(median_total),
    };
    let state = MarketState::from_temperature(temperature);

    let mut notes = vec![match state {
        MarketState::RiskOn => "risk appetite high: exposure can rise with drawdown control".to_string(),
        MarketState::Neutral => "neutral range: stay balanced and watch for a turn".to_string(),
        MarketState::Cautious => "risk appetite low: favour defence and cash".to_string(),
    }];
    notes.push(match breadth {
        Some(b) => format!("breadth (positive price return): {:.2}%", b * 100.0),
        None => "breadth unavailable: no symbol has a price return".to_string(),
    });
    if median_growth >= 65.0 {
        notes.push("growth broadly strong across the watchlist".to_string());
    } else if median_growth <= 45.0 {
        notes.push("growth broadly weak: watch earnings delivery".to_string());
    }
    if median_quality <= 45.0 {
        notes.push("quality broadly weak: demand a wider balance-sheet margin".to_string());
    }
    if median_momentum <= 40.0 {
        notes.push("short-term momentum weak: avoid chasing".to_string());
    }

    Some(MarketPanel {
        as_of: scores.iter().filter_map(|s| s.as_of).max(),
        sample_size: scores.len(),
        risk_temperature: round2(temperature),
        state,
        position_range: state.position_range().to_string(),
        breadth,
        median_total: round2(median_total),
        median_growth: round2(median_growth),
        median_quality: round2(median_quality),
        median_momentum: round2(median_momentum),
        notes,
    })
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Linear map of `value` from `[low, high]` onto 0..=100, clipped.
pub fn map_range(value: Option<f64>, low: f64, high: f64) -> f64 {
    match value {
        Some(v) if high > low && v.is_finite() => ((v - low) / (high - low)).clamp(0.0, 1.0) * 100.0,
        _ => NEUTRAL,
    }
}

/// Like [`map_range`] but lower values score higher.
pub fn map_reverse_range(value: Option<f64>, low: f64, high: f64) -> f64 {
    100.0 - map_range(value, low, high)
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return NEUTRAL;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn clip(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dossier::Fundamentals;

    fn metrics(symbol_id: &str, total_return: Option<f64>, fundamentals: Fundamentals) -> SymbolMetrics {
        let date = NaiveDate::from_ymd_opt(2026, 2, 27).unwrap();
        let mut m = SymbolMetrics::compute(symbol_id, date, "CNY", "CNY", None);
        m.total_return = total_return;
        m.fundamentals = fundamentals;
        m
    }

    fn strong() -> Fundamentals {
        Fundamentals {
            market_cap: Some(1500.0),
            revenue_yoy: Some(0.4),
            net_profit_yoy: Some(0.5),
            net_profit: Some(100.0),
            operating_cash_flow: Some(130.0),
            ocf_to_profit: Some(1.3),
            roe: Some(0.3),
            debt_to_asset: Some(0.1),
            ..Fundamentals::default()
        }
    }

    #[test]
    fn map_range_clips_and_defaults() {
        assert_eq!(map_range(None, 0.0, 1.0), 50.0);
        assert_eq!(map_range(Some(0.25), 0.0, 1.0), 25.0);
        assert_eq!(map_range(Some(-3.0), 0.0, 1.0), 0.0);
        assert_eq!(map_range(Some(3.0), 0.0, 1.0), 100.0);
        assert_eq!(map_range(Some(0.5), 1.0, 1.0), 50.0);
        assert_eq!(map_reverse_range(Some(0.25), 0.0, 1.0), 75.0);
    }

    #[test]
    fn missing_everything_is_neutral() {
        let score = score_symbol(&metrics("600519.SH", None, Fundamentals::default()));
        assert_eq!(score.total, 50.0);
        assert_eq!(score.tier, Tier::C);
        assert!(score.notes.is_empty());
    }

    #[test]
    fn strong_fundamentals_rank_first() {
        // pseudo PE 15 → valuation 90; everything else saturates at 100.
        let best = score_symbol(&metrics("600519.SH", Some(0.5), strong()));
        assert_eq!(best.factors.valuation, 90.0);
        assert_eq!(best.factors.growth, 100.0);
        assert_eq!(best.total, 98.5);
        assert_eq!(best.tier, Tier::A);
        assert_eq!(best.notes.len(), 3);

        let loss_maker = Fundamentals {
            market_cap: Some(1000.0),
            net_profit: Some(-5.0),
            ..Fundamentals::default()
        };
        let ranked = rank_watchlist(&[
            metrics("000001.SZ", Some(-0.3), loss_maker),
            metrics("600519.SH", Some(0.5), strong()),
        ]);
        assert_eq!(ranked[0].symbol_id, "600519.SH");
        assert_eq!(ranked[1].factors.valuation, 30.0);
        assert_eq!(ranked[1].factors.momentum, 0.0);
    }

    #[test]
    fn ties_rank_by_symbol() {
        let ranked = rank_watchlist(&[
            metrics("600519.SH", None, Fundamentals::default()),
            metrics("00700.HK", None, Fundamentals::default()),
        ]);
        let ids: Vec<_> = ranked.iter().map(|s| s.symbol_id.as_str()).collect();
        assert_eq!(ids, ["00700.HK", "600519.SH"]);
    }

    #[test]
    fn profit_without_cash_is_flagged() {
        let f = Fundamentals {
            net_profit: Some(10.0),
            operating_cash_flow: Some(-3.0),
            ..Fundamentals::default()
        };
        let score = score_symbol(&metrics("600519.SH", None, f));
        assert!(score.notes.iter().any(|n| n.starts_with("risk:")));
    }

    #[test]
    fn panel_adjusts_for_breadth() {
        let all = [
            metrics("600519.SH", Some(0.5), strong()),
            metrics("00700.HK", Some(0.1), strong()),
        ];
        let refs: Vec<&SymbolMetrics> = all.iter().collect();
        let scores = rank_watchlist(refs.iter().copied());
        let panel = market_panel(&scores, &refs).unwrap();
        assert_eq!(panel.sample_size, 2);
        assert_eq!(panel.breadth, Some(1.0));
        assert_eq!(panel.state, MarketState::RiskOn);
        assert_eq!(panel.position_range, "60%-80%");
        assert_eq!(panel.risk_temperature, 100.0);
    }

    #[test]
    fn neutral_sample_without_returns() {
        let all = [metrics("600519.SH", None, Fundamentals::default())];
        let refs: Vec<&SymbolMetrics> = all.iter().collect();
        let scores = rank_watchlist(refs.iter().copied());
        let panel = market_panel(&scores, &refs).unwrap();
        assert_eq!(panel.breadth, None);
        assert_eq!(panel.state, MarketState::Neutral);
        assert_eq!(panel.risk_temperature, 50.0);
        assert!(panel.notes.iter().any(|n| n.starts_with("breadth unavailable")));
        assert!(market_panel(&[], &[]).is_none());
    }
}
