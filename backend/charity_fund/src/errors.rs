//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FundError {
    /// A read or save against the store failed.  Raised mid-allocation it
    /// aborts the run and the surrounding transaction is rolled back.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The request body or path could not be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A compare-and-set save lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A fundable record broke `0 <= invested_amount <= full_amount` or its
    /// closed-state bookkeeping before an allocation run began.
    #[error("Arithmetic invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, FundError>;
