//! Error taxonomy shared by every engine component.
//!
//! Components signal a kind at their public boundary; the gateway maps kinds
//! to the stable user-facing envelope. The orchestrator recovers
//! `BackendUnavailable` and `Timeout` through its fallback chain, everything
//! else surfaces unchanged.

use backends::BackendError;
use serde::{Deserialize, Serialize};

/// Stable error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Caller-visible bad input, 4xx-equivalent
    InvalidInput,
    /// Unknown identifier
    NotFound,
    /// State machine violation
    Precondition,
    /// Missing capability or unverified participant
    Unauthorized,
    /// Upstream down or over budget
    BackendUnavailable,
    /// Deadline exceeded inside core logic
    Timeout,
    /// Unexpected; full diagnostics go to the log only
    Internal,
}

impl ErrorKind {
    /// Wire code used in the gateway envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::NotFound => "NOT_FOUND",
            Self::Precondition => "PRECONDITION",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Engine error carrying a kind and a message
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    /// Advisory for `BackendUnavailable`, in milliseconds
    pub retry_after_ms: Option<u64>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_retry_after(mut self, millis: u64) -> Self {
        self.retry_after_ms = Some(millis);
        self
    }

    /// Whether the orchestrator may recover via its fallback chain
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::BackendUnavailable | ErrorKind::Timeout)
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Self::backend_unavailable(msg),
            BackendError::Timeout(msg) => Self::timeout(msg),
            BackendError::Protocol(msg) => Self::internal(msg),
            BackendError::NotFound(msg) => Self::not_found(msg),
        }
    }
}

/// Result type used across the engine
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ErrorKind::InvalidInput.code(), "INVALID_INPUT");
        assert_eq!(ErrorKind::BackendUnavailable.code(), "BACKEND_UNAVAILABLE");
        assert_eq!(ErrorKind::Timeout.code(), "TIMEOUT");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(CoreError::backend_unavailable("down").is_recoverable());
        assert!(CoreError::timeout("slow").is_recoverable());
        assert!(!CoreError::invalid_input("bad").is_recoverable());
        assert!(!CoreError::internal("bug").is_recoverable());
    }

    #[test]
    fn test_backend_error_mapping() {
        let err: CoreError = BackendError::Unavailable("refused".into()).into();
        assert_eq!(err.kind, ErrorKind::BackendUnavailable);

        let err: CoreError = BackendError::NotFound("tool".into()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
