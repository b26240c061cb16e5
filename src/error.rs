//! Error types for the CSI controller
//!
//! Provides structured error types for the reconcilers, the backend client
//! adapters and the API surface. Every error classifies into an
//! [`ErrorCode`] that mirrors the CSI/gRPC status codes the controller
//! reports to its caller.

use thiserror::Error;

/// Unified error type for the controller
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timestamp parse error: {value}: {reason}")]
    TimestampParse { value: String, reason: String },

    #[error("{operation} is not implemented")]
    Unimplemented { operation: String },

    // =========================================================================
    // Request Validation Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported access protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{kind} {name} already exists but is incompatible")]
    Incompatible { kind: String, name: String },

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    // =========================================================================
    // Pagination Errors
    // =========================================================================
    #[error("Invalid starting token {token:?}: {reason}")]
    InvalidStartingToken { token: String, reason: String },

    #[error("startingToken={offset} >= len(snapshots)={len}")]
    StartingTokenOutOfRange { offset: usize, len: usize },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Backend connection error: {0}")]
    BackendConnection(#[from] reqwest::Error),
}

/// Status code reported to the caller for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    Internal,
    Unimplemented,
    Unavailable,
    /// Backend errors surfaced verbatim
    Unknown,
}

impl ErrorCode {
    /// Stable snake_case label used in API responses and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Internal => "internal",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the status code reported to the caller
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) | Error::UnsupportedProtocol { .. } => {
                ErrorCode::InvalidArgument
            }

            Error::ResourceNotFound { .. } | Error::NotFound(_) => ErrorCode::NotFound,

            Error::Incompatible { .. } => ErrorCode::AlreadyExists,

            Error::FailedPrecondition(_) => ErrorCode::FailedPrecondition,

            Error::InvalidStartingToken { .. } | Error::StartingTokenOutOfRange { .. } => {
                ErrorCode::Aborted
            }

            Error::Unimplemented { .. } => ErrorCode::Unimplemented,

            Error::BackendUnavailable { .. } | Error::BackendConnection(_) => {
                ErrorCode::Unavailable
            }

            Error::BackendOperationFailed { .. } => ErrorCode::Unknown,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::TimestampParse { .. } => ErrorCode::Internal,
        }
    }

    /// Check if the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::Unavailable | ErrorCode::Unknown | ErrorCode::Aborted
        )
    }

    /// Check if this error came from the backend orchestrator
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. }
                | Error::BackendOperationFailed { .. }
                | Error::BackendConnection(_)
        )
    }

    pub(crate) fn backend_failed(
        backend: &str,
        operation: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::BackendOperationFailed {
            backend: backend.to_string(),
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Result type alias for the controller
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::Incompatible {
            kind: "Volume".into(),
            name: "vol-1".into(),
        };
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        assert_eq!(err.to_string(), "Volume vol-1 already exists but is incompatible");

        let err = Error::StartingTokenOutOfRange { offset: 4, len: 4 };
        assert_eq!(err.code(), ErrorCode::Aborted);

        let err = Error::UnsupportedProtocol {
            protocol: "nvmeof".into(),
        };
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = Error::TimestampParse {
            value: "yesterday".into(),
            reason: "input contains invalid characters".into(),
        };
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_backend_errors() {
        let err = Error::backend_failed("opensds", "create_volume", "500 Internal Server Error");
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(err.is_backend());
        assert!(err.is_retryable());

        let err = Error::FailedPrecondition("No default profile".into());
        assert!(!err.is_backend());
        assert!(!err.is_retryable());
    }
}
