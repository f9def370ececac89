//! The module contains the error the engine can throw.
//!
//! Every failure of a ledger operation surfaces as a single [`EngineError`].
//! [`EngineError::kind`] sorts it into one of the buckets callers care about:
//!
//! - [`Validation`]: the request can never succeed as issued (unknown
//!   account, non-positive amount, overdraft under a strict policy).
//! - [`Concurrency`]: the backend gave up on a lock or a serialization check;
//!   the caller may retry.
//! - [`Cancelled`]: the caller's cancellation signal fired.
//! - [`Backend`]: connection, commit or rollback trouble.
//!
//!  [`Validation`]: ErrorKind::Validation
//!  [`Concurrency`]: ErrorKind::Concurrency
//!  [`Cancelled`]: ErrorKind::Cancelled
//!  [`Backend`]: ErrorKind::Backend
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Unknown negative balance policy: {0}")]
    InvalidPolicy(String),
    #[error("operation cancelled")]
    Cancelled,
    /// The unit of work failed and the rollback failed too: the state of the
    /// transaction on the backend is unknown.
    #[error("{source}; rollback also failed: {rollback}")]
    Rollback {
        source: Box<EngineError>,
        rollback: DbErr,
    },
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Coarse classification of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Concurrency,
    Cancelled,
    Backend,
}

const CONCURRENCY_MARKERS: [&str; 4] = [
    "deadlock detected",
    "could not serialize access",
    "database is locked",
    "database table is locked",
];

const CONSTRAINT_MARKERS: [&str; 3] = [
    "CHECK constraint failed",
    "violates check constraint",
    "FOREIGN KEY constraint failed",
];

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound(_)
            | Self::InvalidAmount(_)
            | Self::InsufficientFunds(_)
            | Self::CurrencyMismatch(_)
            | Self::InvalidPolicy(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Rollback { .. } => ErrorKind::Backend,
            Self::Database(err) => classify_db_err(err),
        }
    }

    /// Whether re-running the whole operation may succeed.
    ///
    /// A retry creates a brand new transfer: the engine has no deduplication
    /// key.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}

fn classify_db_err(err: &DbErr) -> ErrorKind {
    if matches!(
        err.sql_err(),
        Some(SqlErr::UniqueConstraintViolation(_) | SqlErr::ForeignKeyConstraintViolation(_))
    ) {
        return ErrorKind::Validation;
    }
    let message = err.to_string();
    if CONSTRAINT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorKind::Validation;
    }
    if CONCURRENCY_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorKind::Concurrency;
    }
    ErrorKind::Backend
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::InvalidPolicy(a), Self::InvalidPolicy(b)) => a == b,
            (Self::Cancelled, Self::Cancelled) => true,
            (
                Self::Rollback {
                    source: a,
                    rollback: ra,
                },
                Self::Rollback {
                    source: b,
                    rollback: rb,
                },
            ) => a == b && ra.to_string() == rb.to_string(),
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
