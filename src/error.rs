//! Error type shared by the ledger, session and export layers.
//!
//! Numeric parsing never produces an error and store lookups report absence
//! with `Option`, so everything here is either an I/O-level failure, input
//! rejected at the session boundary, or an index/record divergence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CajaError {
    #[error("sqlite: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid ledger key '{0}'")]
    InvalidKey(String),

    #[error("{0}")]
    Validation(String),

    #[error("ledger index and records diverged: {0}")]
    Consistency(String),

    #[error("database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CajaError>;

impl<T> From<std::sync::PoisonError<T>> for CajaError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CajaError::LockPoisoned
    }
}
