//! Error types for MemoryGraph

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for MemoryGraph operations
pub type Result<T> = std::result::Result<T, MemoryGraphError>;

/// Main error type for MemoryGraph
#[derive(Error, Debug)]
pub enum MemoryGraphError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Snapshot validation failed: {0}")]
    Validation(String),

    #[error("Transient write failure: {0}")]
    TransientWrite(String),

    #[error("Timed out after {after_ms}ms: {operation}")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    #[error("Rollback failed, manual intervention required: {0}")]
    Rollback(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification carried in structured results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Validation,
    TransientWrite,
    Constraint,
    VerificationMismatch,
    Rollback,
    Cancelled,
    Configuration,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Validation => "validation",
            ErrorKind::TransientWrite => "transient_write",
            ErrorKind::Constraint => "constraint",
            ErrorKind::VerificationMismatch => "verification_mismatch",
            ErrorKind::Rollback => "rollback",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl MemoryGraphError {
    /// Check if error is retryable
    ///
    /// Only timeouts, temporary unavailability, and SQLite lock contention
    /// qualify. Everything else fails the same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            MemoryGraphError::TransientWrite(_) | MemoryGraphError::Timeout { .. } => true,
            MemoryGraphError::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryGraphError::Connectivity(_) => ErrorKind::Connectivity,
            MemoryGraphError::Validation(_) => ErrorKind::Validation,
            MemoryGraphError::TransientWrite(_) | MemoryGraphError::Timeout { .. } => {
                ErrorKind::TransientWrite
            }
            MemoryGraphError::Constraint(_) => ErrorKind::Constraint,
            MemoryGraphError::VerificationMismatch(_) => ErrorKind::VerificationMismatch,
            MemoryGraphError::Rollback(_) => ErrorKind::Rollback,
            MemoryGraphError::Cancelled => ErrorKind::Cancelled,
            MemoryGraphError::Config(_)
            | MemoryGraphError::UnsupportedBackend(_)
            | MemoryGraphError::InvalidInput(_) => ErrorKind::Configuration,
            MemoryGraphError::Database(e) => match e.sqlite_error_code() {
                Some(rusqlite::ErrorCode::ConstraintViolation) => ErrorKind::Constraint,
                Some(rusqlite::ErrorCode::DatabaseBusy)
                | Some(rusqlite::ErrorCode::DatabaseLocked) => ErrorKind::TransientWrite,
                Some(rusqlite::ErrorCode::CannotOpen) => ErrorKind::Connectivity,
                _ => ErrorKind::Internal,
            },
            MemoryGraphError::NotFound(_)
            | MemoryGraphError::Serialization(_)
            | MemoryGraphError::Io(_)
            | MemoryGraphError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get error code for MCP protocol
    pub fn code(&self) -> i64 {
        match self {
            MemoryGraphError::NotFound(_) => -32001,
            MemoryGraphError::InvalidInput(_) => -32602,
            MemoryGraphError::Config(_) | MemoryGraphError::UnsupportedBackend(_) => -32602,
            MemoryGraphError::Validation(_) => -32010,
            MemoryGraphError::VerificationMismatch(_) => -32011,
            MemoryGraphError::Rollback(_) => -32012,
            MemoryGraphError::Cancelled => -32013,
            _ => -32000,
        }
    }
}
