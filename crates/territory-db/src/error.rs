//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with context about which row or document failed. At the
//! engine seam every [`DbError`] becomes a [`HistoryError`].

use territory_history::HistoryError;
use territory_types::PayloadError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A change record's documents do not form a valid payload.
    #[error("Change payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A stored row holds a value the domain model rejects.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A write targeted a row that does not exist.
    #[error("Missing row: {0}")]
    MissingRow(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for HistoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::MissingRow(what) => Self::Inconsistent(what),
            other => Self::Persistence(other.to_string()),
        }
    }
}
