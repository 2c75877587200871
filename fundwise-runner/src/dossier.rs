//! Company fundamentals from the `market_cap` and `financials` datasets.
//!
//! Point values come from each table's latest row. Growth rates compare the
//! last two non-null periods of a column. Monetary values carry their
//! target-currency sibling when the normalize stage produced one.

use chrono::NaiveDate;
use serde::Serialize;

use fundwise_core::data::{Cell, Table};

use crate::metrics::{converted_at, converted_column, Converted};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Fundamentals {
    /// Latest date across the price, market-cap and financials tables.
    pub as_of: Option<NaiveDate>,
    pub market_cap: Option<f64>,
    pub market_cap_converted: Option<Converted>,
    pub revenue: Option<f64>,
    pub revenue_converted: Option<Converted>,
    pub net_profit: Option<f64>,
    pub net_profit_converted: Option<Converted>,
    pub operating_cash_flow: Option<f64>,
    pub operating_cash_flow_converted: Option<Converted>,
    pub roe: Option<f64>,
    pub debt_to_asset: Option<f64>,
    pub revenue_yoy: Option<f64>,
    pub net_profit_yoy: Option<f64>,
    pub ocf_to_profit: Option<f64>,
}

impl Fundamentals {
    pub fn compute(
        target_currency: &str,
        prices: Option<&Table>,
        market_cap: Option<&Table>,
        financials: Option<&Table>,
    ) -> Self {
        let latest = |table: Option<&Table>, column: &str| -> (Option<f64>, Option<Converted>) {
            let Some((t, row)) = table.and_then(|t| t.len().checked_sub(1).map(|r| (t, r))) else {
                return (None, None);
            };
            (
                t.cell(row, column).and_then(Cell::as_f64),
                converted_at(t, row, &converted_column(column, target_currency)),
            )
        };

        let (market_cap_value, market_cap_converted) = latest(market_cap, "market_cap");
        let (revenue, revenue_converted) = latest(financials, "revenue");
        let (net_profit, net_profit_converted) = latest(financials, "net_profit");
        let (operating_cash_flow, operating_cash_flow_converted) =
            latest(financials, "operating_cash_flow");

        Self {
            as_of: [prices, market_cap, financials]
                .into_iter()
                .flatten()
                .filter_map(Table::latest_date)
                .max(),
            market_cap: market_cap_value,
            market_cap_converted,
            revenue,
            revenue_converted,
            net_profit,
            net_profit_converted,
            operating_cash_flow,
            operating_cash_flow_converted,
            roe: latest(financials, "roe").0,
            debt_to_asset: latest(financials, "debt_to_asset").0,
            revenue_yoy: financials.and_then(|t| period_growth(&t.numbers("revenue"))),
            net_profit_yoy: financials.and_then(|t| period_growth(&t.numbers("net_profit"))),
            ocf_to_profit: ratio(operating_cash_flow, net_profit),
        }
    }

    /// True when neither fundamentals dataset contributed anything.
    pub fn is_empty(&self) -> bool {
        self.market_cap.is_none()
            && self.revenue.is_none()
            && self.net_profit.is_none()
            && self.operating_cash_flow.is_none()
            && self.roe.is_none()
            && self.debt_to_asset.is_none()
    }
}

/// Growth of the last value over the one before it, as a fraction of the
/// earlier value's magnitude. `None` with fewer than two values or a zero base.
pub fn period_growth(series: &[f64]) -> Option<f64> {
    match series {
        [.., prev, current] if *prev != 0.0 => Some((current - prev) / prev.abs()),
        _ => None,
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}
