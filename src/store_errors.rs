//! # Store Error Types Module
//!
//! Error types for batch persistence. Retryable failures (connection
//! problems, file system hiccups) are separated from ones that will fail
//! the same way again.

use thiserror::Error;

/// Errors raised by a [`BatchRepository`](crate::batch_store::BatchRepository)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// File system errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No record with this id
    #[error("Batch not found: {0}")]
    NotFound(String),
    /// Store temporarily unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether trying the same operation again may succeed
    ///
    /// Driver errors only count when the connection or the server failed;
    /// missing rows and decode failures come back the same every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(error) => matches!(
                error,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Database(_)
            ),
            StoreError::Io(_) | StoreError::Unavailable(_) => true,
            StoreError::Serialization(_) | StoreError::NotFound(_) => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
