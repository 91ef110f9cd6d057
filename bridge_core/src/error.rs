//! Error types for bridge operations.

use thiserror::Error;

use crate::status::PendingOperation;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors reported to callers of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Malformed or empty input
    #[error("Missing argument '{0}'")]
    MissingArgument(String),

    /// Tunnel-creation consent was refused
    #[error("Permission has been denied")]
    PermissionDenied,

    /// Another lifecycle operation has not resolved yet
    #[error("Operation in progress: {0}")]
    OperationInProgress(PendingOperation),

    /// The backend rejected or failed the request
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    /// Unknown method on the call surface
    #[error("Method '{0}' is not implemented")]
    NotImplemented(String),
}

impl BridgeError {
    /// Stable wire code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::MissingArgument(_) => "missing_argument",
            BridgeError::PermissionDenied => "permission_denied",
            BridgeError::OperationInProgress(_) => "operation_in_progress",
            BridgeError::BackendFailure(_) => "backend_failure",
            BridgeError::NotImplemented(_) => "not_implemented",
        }
    }
}

/// Error returned by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The engine refused the requested state
    #[error("rejected: {0}")]
    Rejected(String),

    /// The engine is not available in this process
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Native error code from the engine
    #[error("native error {code}: {message}")]
    Native { code: i32, message: String },
}

impl From<BackendError> for BridgeError {
    fn from(err: BackendError) -> Self {
        BridgeError::BackendFailure(err.to_string())
    }
}
