//! Store error type shared by the registry, FX store, ledger, and artifact index.

use thiserror::Error;

use crate::domain::JobStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "duplicate symbol {symbol_id}: registered as {existing_market}/{existing_currency}, \
         attempted {market}/{currency}"
    )]
    DuplicateSymbol {
        symbol_id: String,
        existing_market: String,
        existing_currency: String,
        market: String,
        currency: String,
    },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("job {job_id} already completed with status {status}")]
    DoubleCompletion { job_id: i64, status: JobStatus },

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("invalid fx rate: {0}")]
    InvalidFxRate(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Errors that indicate a caller bug rather than an operational condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateSymbol { .. } | StoreError::DoubleCompletion { .. }
        )
    }
}
