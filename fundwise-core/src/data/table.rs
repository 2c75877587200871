//! Column-oriented tabular container shared by sources, the adapter, and the
//! snapshot store.
//!
//! Sources hand back loosely typed cells (`Text`/`Number`); the adapter coerces
//! them into the column contract for the dataset kind.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker written in place of a value that could not be derived, e.g. a
/// currency conversion with no FX rate.
pub const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Unavailable,
}

impl Cell {
    /// Build a numeric cell, mapping non-finite values to `Null`.
    pub fn number(value: f64) -> Self {
        if value.is_finite() {
            Cell::Number(value)
        } else {
            Cell::Null
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Cell::Unavailable)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Number(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// Row-major table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row; short rows are padded with `Null`, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    /// Iterate one column's cells. Empty if the column does not exist.
    pub fn column(&self, name: &str) -> impl Iterator<Item = &Cell> + '_ {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| idx.and_then(|i| row.get(i)))
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Append a column computed from each row.
    pub fn add_column<F>(&mut self, name: impl Into<String>, mut f: F)
    where
        F: FnMut(&[Cell]) -> Cell,
    {
        self.columns.push(name.into());
        for row in &mut self.rows {
            let value = f(row);
            row.push(value);
        }
    }

    /// Date of the last row whose `date` column is populated.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.column("date").filter_map(Cell::as_date).max()
    }

    /// Numeric values of a column, skipping non-numeric cells.
    pub fn numbers(&self, name: &str) -> Vec<f64> {
        self.column(name).filter_map(Cell::as_f64).collect()
    }

    /// Content hash over the serialized table.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Render as CSV text with a header row.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse CSV with a header row into loosely typed cells: empty → `Null`,
    /// numeric-looking → `Number`, everything else `Text`.
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = Table::new(columns);
        for record in rdr.records() {
            let record = record?;
            table.push_row(record.iter().map(raw_cell).collect());
        }
        Ok(table)
    }
}

/// Interpret a raw text field from an upstream payload.
pub fn raw_cell(field: &str) -> Cell {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    match trimmed.replace(',', "").parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Number(v),
        _ => Cell::Text(trimmed.to_string()),
    }
}
