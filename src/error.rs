//! Error taxonomy shared by the credential manager, the node tree, file
//! handles and the upload engine.

use thiserror::Error;

/// Errors surfaced by the drive filesystem core.
///
/// The type is `Clone` because a failed folder fetch is cached on the node
/// and handed back to every later caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriveError {
    /// Path segment or item does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Wrong node kind, bad write offset, trashing a drive, ...
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Authorization code exchange or token decoding failed
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// No usable token and no refresh token; a new login is required
    #[error("session has expired, please login again")]
    SessionExpired,

    /// Error payload reported by the backend or a non-success blob store status
    #[error("backend error: {0}")]
    Backend(String),

    /// Backend asked the caller to follow a redirect
    #[error("redirect required to {url}")]
    RedirectRequired { url: String, code: u16 },

    /// Network level failure, retryable by the caller
    #[error("transport error: {0}")]
    Transport(String),

    /// Response payload did not match the expected schema
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Operation the backend model cannot express (append mode, ...)
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Local I/O failure (credential persistence)
    #[error("i/o error: {0}")]
    Io(String),
}

impl DriveError {
    /// Transport failures are the only errors a caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriveError::Transport(_))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DriveError::InvalidOperation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        DriveError::NotFound(what.into())
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DriveError::Decode(err.to_string())
        } else {
            DriveError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        DriveError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for DriveError {
    fn from(err: std::io::Error) -> Self {
        DriveError::Io(err.to_string())
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, DriveError>;
