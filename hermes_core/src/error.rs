//! Unified error handling for HERMES.
//!
//! One error type covers both crates so driver and client code can
//! propagate with `?` across the boundary.

use thiserror::Error;

use crate::command::ErrorCode;

/// Main error type for HERMES operations.
#[derive(Debug, Error)]
pub enum HermesError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Insufficient storage for a mapped log (the ENOSPC path)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Memory mapping / layout errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control-protocol rejections carrying the wire error code
    #[error("Protocol error ({code:?}): {message}")]
    Protocol { code: ErrorCode, message: String },

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Explicit agent termination. Not a failure: propagated as a result
    /// so runners can unwind cleanly without panicking.
    #[error("Agent terminated")]
    Terminated,
}

/// Convenience type alias for Results using HermesError
pub type HermesResult<T> = std::result::Result<T, HermesError>;

impl HermesError {
    /// Create a storage error with a custom message
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        HermesError::Storage(msg.into())
    }

    /// Create a memory error
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        HermesError::Memory(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        HermesError::Config(msg.into())
    }

    /// Create a protocol error with its wire code
    pub fn protocol<S: Into<String>>(code: ErrorCode, msg: S) -> Self {
        HermesError::Protocol {
            code,
            message: msg.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        HermesError::InvalidInput(msg.into())
    }

    /// The wire error code a control-protocol response should carry.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            HermesError::Protocol { code, .. } => *code,
            HermesError::Storage(_) => ErrorCode::StorageSpace,
            _ => ErrorCode::GenericError,
        }
    }
}
