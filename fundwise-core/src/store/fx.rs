//! FX rate store: `(date, base, quote) → rate` with upsert semantics.
//!
//! `lookup` answers only for the exact date. Identity pairs always return
//! 1.0 without a stored row. Any nearby-date or inverse-pair fallback is the
//! caller's policy, built on `lookup_on_or_before`.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

use super::db::{decode_date, encode_date, encode_ts, Database};
use super::error::StoreError;
use crate::clock::Clock;
use crate::domain::FxRate;

#[derive(Clone)]
pub struct FxRateStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl FxRateStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert or overwrite the rate for `(date, base, quote)`.
    pub fn upsert(
        &self,
        date: NaiveDate,
        base: &str,
        quote: &str,
        rate: f64,
        source: &str,
    ) -> Result<FxRate, StoreError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(StoreError::InvalidFxRate(format!(
                "rate must be a positive number, got {rate}"
            )));
        }
        let base = normalize_currency(base);
        let quote = normalize_currency(quote);
        let source = source.trim();
        if base.is_empty() || quote.is_empty() {
            return Err(StoreError::InvalidInput("currency codes must be non-empty".into()));
        }
        if source.is_empty() {
            return Err(StoreError::InvalidInput("fx source must be non-empty".into()));
        }
        let now = encode_ts(self.clock.now());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO fx_rates (date, base_currency, quote_currency, rate, source, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(date, base_currency, quote_currency) DO UPDATE SET
                    rate = excluded.rate,
                    source = excluded.source,
                    updated_at = excluded.updated_at",
                params![encode_date(date), base, quote, rate, source, now],
            )?;
            Ok(())
        })?;
        debug!(%date, base = %base, quote = %quote, rate, "upserted fx rate");

        Ok(FxRate {
            date,
            base_currency: base,
            quote_currency: quote,
            rate,
            source: source.to_string(),
        })
    }

    /// Exact-date rate for `base → quote`.
    pub fn lookup(&self, date: NaiveDate, base: &str, quote: &str) -> Result<Option<f64>, StoreError> {
        let base = normalize_currency(base);
        let quote = normalize_currency(quote);
        if base == quote {
            return Ok(Some(1.0));
        }
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT rate FROM fx_rates
                     WHERE date = ?1 AND base_currency = ?2 AND quote_currency = ?3",
                    params![encode_date(date), base, quote],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Most recent stored rate for `base → quote` dated within
    /// `[earliest, date]`.
    pub fn lookup_on_or_before(
        &self,
        date: NaiveDate,
        base: &str,
        quote: &str,
        earliest: NaiveDate,
    ) -> Result<Option<FxRate>, StoreError> {
        let base = normalize_currency(base);
        let quote = normalize_currency(quote);
        if base == quote {
            return Ok(Some(FxRate {
                date,
                base_currency: base,
                quote_currency: quote,
                rate: 1.0,
                source: "identity".into(),
            }));
        }
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT date, rate, source FROM fx_rates
                     WHERE base_currency = ?1 AND quote_currency = ?2
                       AND date <= ?3 AND date >= ?4
                     ORDER BY date DESC LIMIT 1",
                    params![base, quote, encode_date(date), encode_date(earliest)],
                    |row| {
                        let stored: String = row.get(0)?;
                        Ok(FxRate {
                            date: decode_date(&stored, 0)?,
                            base_currency: base.clone(),
                            quote_currency: quote.clone(),
                            rate: row.get(1)?,
                            source: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }
}
