//! Error types for pump operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all pump and entity operations
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("Entity not found: {entity}")]
    EntityNotFound { entity: String },

    #[error("Unauthorized for operation: {operation}")]
    Unauthorized { operation: String },

    #[error("Message lock lost or expired: {lock_token}")]
    LockLost { lock_token: String },

    #[error("Session '{session_id}' lock lost or expired")]
    SessionLockLost { session_id: String },

    #[error("Session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Entity client is closed")]
    EntityClosed,

    #[error("Invalid transaction state: {message}")]
    InvalidTransactionState { message: String },

    #[error("Handler callback failed: {cause}")]
    Callback { cause: anyhow::Error },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl PumpError {
    /// Check if error is transient and the operation can be re-issued
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EntityNotFound { .. } => false,
            Self::Unauthorized { .. } => false,
            Self::LockLost { .. } => false,
            Self::SessionLockLost { .. } => false,
            Self::SessionNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::EntityClosed => false,
            Self::InvalidTransactionState { .. } => false,
            Self::Callback { .. } => false,
            Self::Validation(_) => false,
        }
    }

    /// Get suggested delay before re-issuing the failed operation
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { .. } => Some(Duration::from_millis(100)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Validation errors for domain identifiers and handler options
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Tag identifying which pump activity an error was raised from.
///
/// Carried alongside errors reported through `notify_exception` so handlers
/// can distinguish a failed receive from a failed settlement. A tagged error
/// never halts the pump by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionPhase {
    Receive,
    RenewLock,
    UserCallback,
    Complete,
    Abandon,
    AcceptSession,
    CloseSession,
}

impl std::fmt::Display for ExceptionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Receive => "receive",
            Self::RenewLock => "renew-lock",
            Self::UserCallback => "user-callback",
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::AcceptSession => "accept-session",
            Self::CloseSession => "close-session",
        };
        write!(f, "{}", tag)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
