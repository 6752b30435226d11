//! Error types for the Lexis library.
//!
//! Every fallible operation returns [`Result`], whose error side is the
//! [`LexisError`] enum. Low-level errors (storage, decoding) surface unchanged
//! at the writer and reader boundary.
//!
//! # Examples
//!
//! ```
//! use lexis::error::{LexisError, Result};
//!
//! fn open_segment() -> Result<()> {
//!     Err(LexisError::corrupt("bad magic in term dictionary"))
//! }
//!
//! assert!(matches!(open_segment(), Err(LexisError::CorruptSegment(_))));
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Lexis operations.
#[derive(Error, Debug)]
pub enum LexisError {
    /// Malformed bytes in a segment, posting list or manifest.
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    /// Storage error. In-flight state is preserved so the caller may retry.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),

    /// Another writer holds the index write lock.
    #[error("Writer locked: {0}")]
    WriterLocked(String),

    /// A document or stored value does not agree with the declared schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A query cannot be evaluated against the schema (e.g. phrase without positions).
    #[error("Query type error: {0}")]
    QueryTypeError(String),

    /// Operation on a closed handle or with an out-of-range argument.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization of manifests or stored fields failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for operations that may fail with LexisError.
pub type Result<T> = std::result::Result<T, LexisError>;

impl LexisError {
    /// Create a new corrupt segment error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        LexisError::CorruptSegment(msg.into())
    }

    /// Create a new writer locked error.
    pub fn writer_locked<S: Into<String>>(msg: S) -> Self {
        LexisError::WriterLocked(msg.into())
    }

    /// Create a new schema mismatch error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        LexisError::SchemaMismatch(msg.into())
    }

    /// Create a new query type error.
    pub fn query_type<S: Into<String>>(msg: S) -> Self {
        LexisError::QueryTypeError(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        LexisError::InvalidOperation(msg.into())
    }

    /// Create a new storage error that is reported as an I/O failure.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        LexisError::IoFailure(io::Error::other(msg.into()))
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        LexisError::Serialization(msg.into())
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LexisError::IoFailure(_) | LexisError::WriterLocked(_))
    }
}

impl From<serde_json::Error> for LexisError {
    fn from(err: serde_json::Error) -> Self {
        LexisError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for LexisError {
    fn from(err: bincode::Error) -> Self {
        LexisError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = LexisError::corrupt("zero delta");
        assert_eq!(error.to_string(), "Corrupt segment: zero delta");

        let error = LexisError::schema("unknown field 'body'");
        assert_eq!(error.to_string(), "Schema mismatch: unknown field 'body'");

        let error = LexisError::writer_locked("WRITELOCK");
        assert_eq!(error.to_string(), "Writer locked: WRITELOCK");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let lexis_error = LexisError::from(io_error);

        match lexis_error {
            LexisError::IoFailure(_) => {}
            _ => panic!("Expected IoFailure variant"),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(LexisError::storage("disk full").is_retryable());
        assert!(LexisError::writer_locked("busy").is_retryable());
        assert!(!LexisError::corrupt("bad crc").is_retryable());
        assert!(!LexisError::query_type("no positions").is_retryable());
    }
}
