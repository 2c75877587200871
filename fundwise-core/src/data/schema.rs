//! Column contracts per dataset kind and the normalization that enforces them.
//!
//! Upstream sources rename columns without notice, so every canonical column
//! carries a list of accepted aliases. Normalization:
//! 1. Zero rows → `NoDataAvailable` (nothing to validate against).
//! 2. Resolve each canonical column to the first alias present.
//! 3. Coerce cells to the declared type; unparseable values become null.
//!    Rows with a null date are dropped.
//! 4. Required columns that are absent, or left entirely null after
//!    coercion → `SchemaDrift` naming all of them at once.
//! 5. Sort ascending by date.
//!
//! Values are never altered beyond type coercion.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::provider::DataError;
use super::table::{Cell, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    PriceHistory,
    MarketCap,
    PeHistory,
    Financials,
    IndustryPe,
    IndustryRoe,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::PriceHistory => "price_history",
            DatasetKind::MarketCap => "market_cap",
            DatasetKind::PeHistory => "pe_history",
            DatasetKind::Financials => "financials",
            DatasetKind::IndustryPe => "industry_pe",
            DatasetKind::IndustryRoe => "industry_roe",
        }
    }

    pub fn contract(&self) -> &'static [ColumnSpec] {
        match self {
            DatasetKind::PriceHistory => PRICE_HISTORY,
            DatasetKind::MarketCap => MARKET_CAP,
            DatasetKind::PeHistory => PE_HISTORY,
            DatasetKind::Financials => FINANCIALS,
            DatasetKind::IndustryPe => INDUSTRY_PE,
            DatasetKind::IndustryRoe => INDUSTRY_ROE,
        }
    }

    /// Canonical column names in contract order.
    pub fn column_names(&self) -> Vec<String> {
        self.contract().iter().map(|c| c.name.to_string()).collect()
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_history" => Ok(DatasetKind::PriceHistory),
            "market_cap" => Ok(DatasetKind::MarketCap),
            "pe_history" => Ok(DatasetKind::PeHistory),
            "financials" => Ok(DatasetKind::Financials),
            "industry_pe" => Ok(DatasetKind::IndustryPe),
            "industry_roe" => Ok(DatasetKind::IndustryRoe),
            other => Err(format!("unknown dataset kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Date,
    Number,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub ty: CellType,
    pub required: bool,
    /// Denominated in the instrument's currency; gets a converted sibling.
    pub monetary: bool,
}

const fn col(
    name: &'static str,
    aliases: &'static [&'static str],
    ty: CellType,
    required: bool,
    monetary: bool,
) -> ColumnSpec {
    ColumnSpec {
        name,
        aliases,
        ty,
        required,
        monetary,
    }
}

use CellType::{Date, Number, Text};

const DATE: ColumnSpec = col("date", &["date", "日期", "trade_date", "数据日期"], Date, true, false);

static PRICE_HISTORY: &[ColumnSpec] = &[
    DATE,
    col("open", &["open", "开盘"], Number, true, true),
    col("high", &["high", "最高"], Number, true, true),
    col("low", &["low", "最低"], Number, true, true),
    col("close", &["close", "收盘"], Number, true, true),
    col("volume", &["volume", "成交量"], Number, true, false),
    col("turnover", &["turnover", "amount", "成交额"], Number, false, true),
];

static MARKET_CAP: &[ColumnSpec] = &[
    DATE,
    col("market_cap", &["market_cap", "总市值", "value"], Number, true, true),
];

static PE_HISTORY: &[ColumnSpec] = &[
    DATE,
    col("pe", &["pe", "pe_ttm", "市盈率", "value"], Number, true, false),
];

static FINANCIALS: &[ColumnSpec] = &[
    DATE,
    col("revenue", &["revenue", "营业总收入", "营业收入"], Number, true, true),
    col("net_profit", &["net_profit", "净利润", "归母净利润"], Number, true, true),
    col("operating_cash_flow", &["operating_cash_flow", "ocf", "经营现金流量净额"], Number, false, true),
    col("total_assets", &["total_assets", "资产总计"], Number, false, true),
    col("total_liabilities", &["total_liabilities", "负债合计"], Number, false, true),
    col("roe", &["roe", "净资产收益率"], Number, false, false),
    col("debt_to_asset", &["debt_to_asset", "资产负债率"], Number, false, false),
];

static INDUSTRY_PE: &[ColumnSpec] = &[
    DATE,
    col("industry", &["industry", "行业名称", "板块名称"], Text, true, false),
    col("industry_pe", &["industry_pe", "静态市盈率", "市盈率"], Number, true, false),
];

static INDUSTRY_ROE: &[ColumnSpec] = &[
    DATE,
    col("industry", &["industry", "行业名称", "板块名称"], Text, true, false),
    col("industry_roe", &["industry_roe", "净资产收益率"], Number, true, false),
    col("sample_size", &["sample_size", "样本数"], Number, false, false),
];

const ALL_KINDS: [DatasetKind; 6] = [
    DatasetKind::PriceHistory,
    DatasetKind::MarketCap,
    DatasetKind::PeHistory,
    DatasetKind::Financials,
    DatasetKind::IndustryPe,
    DatasetKind::IndustryRoe,
];

/// Whether a canonical column is currency-denominated in any contract.
pub fn is_monetary(column: &str) -> bool {
    ALL_KINDS
        .iter()
        .flat_map(|k| k.contract())
        .any(|spec| spec.monetary && spec.name == column)
}

/// Normalize a raw upstream table into the contract for `kind`.
pub fn normalize_table(kind: DatasetKind, raw: &Table) -> Result<Table, DataError> {
    if raw.is_empty() {
        return Err(DataError::NoDataAvailable {
            dataset: kind.as_str().to_string(),
            cause: "upstream returned zero rows".into(),
        });
    }

    let contract = kind.contract();
    let resolved: Vec<Option<usize>> = contract
        .iter()
        .map(|spec| spec.aliases.iter().find_map(|a| raw.column_index(a)))
        .collect();

    let mut table = Table::new(kind.column_names());
    for raw_row in &raw.rows {
        let row: Vec<Cell> = contract
            .iter()
            .zip(&resolved)
            .map(|(spec, idx)| match (*idx).and_then(|i| raw_row.get(i)) {
                Some(cell) => coerce(cell, spec.ty),
                None => Cell::Null,
            })
            .collect();
        if row[0].as_date().is_some() {
            table.rows.push(row);
        }
    }

    // Checked on coerced cells: a column whose every value fails to parse
    // (e.g. a new date format) is as missing as an absent one. With no
    // dated rows left only the date column is blamed.
    let missing: Vec<String> = contract
        .iter()
        .zip(&resolved)
        .enumerate()
        .filter(|(i, (spec, idx))| {
            spec.required
                && (idx.is_none()
                    || ((*i == 0 || !table.is_empty())
                        && table.rows.iter().all(|r| r[*i].is_null())))
        })
        .map(|(_, (spec, _))| spec.name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DataError::SchemaDrift {
            dataset: kind.as_str().to_string(),
            missing,
        });
    }

    table
        .rows
        .sort_by_key(|r| r.first().and_then(Cell::as_date));
    Ok(table)
}

fn coerce(cell: &Cell, ty: CellType) -> Cell {
    match (ty, cell) {
        (_, Cell::Null) | (_, Cell::Unavailable) => cell.clone(),
        (CellType::Date, Cell::Date(_)) => cell.clone(),
        (CellType::Date, Cell::Text(s)) => parse_date(s).map_or(Cell::Null, Cell::Date),
        (CellType::Date, Cell::Number(n)) => parse_date(&format!("{n}")).map_or(Cell::Null, Cell::Date),
        (CellType::Number, Cell::Number(n)) => Cell::number(*n),
        (CellType::Number, Cell::Text(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map_or(Cell::Null, Cell::number),
        (CellType::Number, Cell::Date(_)) => Cell::Null,
        (CellType::Text, Cell::Text(_)) => cell.clone(),
        (CellType::Text, other) => Cell::Text(other.to_string()),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, and ISO datetimes.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}
