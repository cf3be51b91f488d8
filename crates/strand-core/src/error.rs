//! Error types for Strand Core

use thiserror::Error;

/// Result type alias using Strand Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Strand storage kernel
///
/// None of these are transient. Every variant aborts the enclosing
/// transaction; the layer never retries on its own.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file layout or capacity errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Structural corruption: a chain neighbour does not point back, or a
    /// node is neither endpoint of a relationship being walked
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Contract misuse such as commit without prepare, double prepare,
    /// or mutating a deleted record
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Record id absent from a store
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write method was called on a read-only transaction
    #[error("This is a read only transaction, this method should never be invoked")]
    ReadOnly,

    /// Lock could not be acquired
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Logical log errors
    #[error("WAL error: {0}")]
    Wal(String),

    /// Command (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a structural corruption error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a WAL error
    pub fn wal(msg: impl Into<String>) -> Self {
        Self::Wal(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error signals structural corruption of a chain
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::InvalidRecord(_))
    }
}
