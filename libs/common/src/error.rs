//! Custom error types for the common library
//!
//! This module defines application-specific error types that can be used
//! throughout the application.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Error type for key-value store operations
///
/// Driver errors are flattened to strings so the error can be cloned and
/// handed to every waiter of a shared lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected the command or the connection failed
    #[error("Key-value store error: {0}")]
    Backend(String),

    /// The operation did not complete within the configured timeout
    #[error("Key-value store operation timed out")]
    Timeout,

    /// A script argument could not be interpreted
    #[error("Invalid script argument: {0}")]
    InvalidArgument(String),

    /// A key holds a value of the wrong type for the requested operation
    #[error("Wrong value type stored at key: {0}")]
    WrongType(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;
