//! Common error types for the receipt scanner

use thiserror::Error;

/// Common result type for receipt scanner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the store, config and services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A receipt with the same unique key is already stored
    #[error("Receipt already exists: {0}")]
    Duplicate(String),

    /// Internal error (stored data no longer matches what the code expects)
    #[error("Internal error: {0}")]
    Internal(String),
}
