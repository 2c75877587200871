//! Symbol registry: the canonical list of tracked instruments.

use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;

use super::db::{decode_ts, encode_ts, Database};
use super::error::StoreError;
use crate::clock::Clock;
use crate::domain::{Market, Symbol};

#[derive(Clone)]
pub struct SymbolRegistry {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SymbolRegistry {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Register a symbol. Re-registering with identical market and currency
    /// returns the existing row unchanged; any difference is a
    /// `DuplicateSymbol` error.
    pub fn register(
        &self,
        symbol_id: &str,
        market: Market,
        currency: &str,
    ) -> Result<Symbol, StoreError> {
        let symbol_id = symbol_id.trim();
        let currency = currency.trim().to_ascii_uppercase();
        if symbol_id.is_empty() || currency.is_empty() {
            return Err(StoreError::InvalidInput(
                "symbol_id and currency must be non-empty".into(),
            ));
        }
        let now = self.clock.now();

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if let Some(existing) = get_symbol(&tx, symbol_id)? {
                if existing.market != market || existing.currency != currency {
                    return Err(StoreError::DuplicateSymbol {
                        symbol_id: symbol_id.to_string(),
                        existing_market: existing.market.to_string(),
                        existing_currency: existing.currency,
                        market: market.to_string(),
                        currency,
                    });
                }
                return Ok(existing);
            }

            tx.execute(
                "INSERT INTO symbols (symbol_id, market, currency, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                params![symbol_id, market.as_str(), currency, encode_ts(now)],
            )?;
            tx.commit()?;
            info!(symbol = symbol_id, market = %market, currency = %currency, "registered symbol");

            Ok(Symbol {
                symbol_id: symbol_id.to_string(),
                market,
                currency,
                active: true,
                updated_at: now,
            })
        })
    }

    pub fn get(&self, symbol_id: &str) -> Result<Option<Symbol>, StoreError> {
        self.db.with_conn(|conn| get_symbol(conn, symbol_id))
    }

    /// Active symbols, ordered by id.
    pub fn list_active(&self) -> Result<Vec<Symbol>, StoreError> {
        self.list("WHERE active = 1")
    }

    /// Every registered symbol, active or not, ordered by id.
    pub fn list_all(&self) -> Result<Vec<Symbol>, StoreError> {
        self.list("")
    }

    /// Mark a symbol inactive. Idempotent; unknown symbols are an error.
    pub fn deactivate(&self, symbol_id: &str) -> Result<(), StoreError> {
        self.set_active(symbol_id, false)
    }

    pub fn activate(&self, symbol_id: &str) -> Result<(), StoreError> {
        self.set_active(symbol_id, true)
    }

    fn set_active(&self, symbol_id: &str, active: bool) -> Result<(), StoreError> {
        let now = encode_ts(self.clock.now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE symbols SET active = ?2, updated_at = ?3
                 WHERE symbol_id = ?1 AND active <> ?2",
                params![symbol_id, active, now],
            )?;
            if changed == 0 && get_symbol(conn, symbol_id)?.is_none() {
                return Err(StoreError::SymbolNotFound(symbol_id.to_string()));
            }
            if changed > 0 {
                info!(symbol = symbol_id, active, "symbol status changed");
            }
            Ok(())
        })
    }

    fn list(&self, filter: &str) -> Result<Vec<Symbol>, StoreError> {
        let sql = format!(
            "SELECT symbol_id, market, currency, active, updated_at FROM symbols {filter}
             ORDER BY symbol_id"
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], symbol_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn get_symbol(conn: &rusqlite::Connection, symbol_id: &str) -> Result<Option<Symbol>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT symbol_id, market, currency, active, updated_at FROM symbols
             WHERE symbol_id = ?1",
            [symbol_id],
            symbol_from_row,
        )
        .optional()?)
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    let market: String = row.get(1)?;
    let updated_at: String = row.get(4)?;
    Ok(Symbol {
        symbol_id: row.get(0)?,
        market: market.parse::<Market>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        currency: row.get(2)?,
        active: row.get(3)?,
        updated_at: decode_ts(&updated_at, 4)?,
    })
}
