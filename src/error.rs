use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or rejected bearer credential. The message is user-facing.
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("AI credits exhausted. Please add credits.")]
    QuotaExhausted,

    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Failed to store assessments: {0}")]
    Persistence(String),

    /// Reading a user's metrics failed. Surfaced as "Failed to fetch metrics".
    #[error("Failed to fetch metrics: {0}")]
    FetchMetrics(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn missing_credentials() -> Self {
        Error::Unauthenticated("No authorization header".into())
    }

    pub fn invalid_token() -> Self {
        Error::Unauthenticated("Invalid token".into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
