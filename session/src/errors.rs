use serde::{Deserialize, Serialize};
use std::fmt;

/// EIP-1193 code a provider reports when the user rejects a request.
pub const USER_REJECTED_REQUEST: i64 = 4001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionError {
    // Selection errors
    Selection(String),

    // Provider errors
    Provider(String),
    Rpc { code: i64, message: String },

    // Validation errors
    ValidationError(String),
    InvalidAccount(String),
    InvalidChainId(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Lifecycle errors
    ShutDown,
}

impl SessionError {
    /// True when the provider reported that the user declined the request.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, SessionError::Rpc { code, .. } if *code == USER_REJECTED_REQUEST)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::Selection(msg) => write!(f, "Provider selection failed: {}", msg),

            SessionError::Provider(msg) => write!(f, "Provider error: {}", msg),
            SessionError::Rpc { code, message } => {
                write!(f, "Provider RPC error {}: {}", code, message)
            }

            SessionError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            SessionError::InvalidAccount(msg) => write!(f, "Invalid account: {}", msg),
            SessionError::InvalidChainId(msg) => write!(f, "Invalid chain id: {}", msg),

            SessionError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            SessionError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            SessionError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            SessionError::ShutDown => write!(f, "Session context has been shut down"),
        }
    }
}

impl std::error::Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

// Conversion helpers
impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => SessionError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SessionError::PermissionDenied(error.to_string())
            }
            _ => SessionError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        SessionError::ValidationError(format!("JSON error: {}", error))
    }
}
