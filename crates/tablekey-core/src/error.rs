//! Error types for Tablekey

use thiserror::Error;

/// Main error type for Tablekey operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("No refresh credential stored; a fresh login is required")]
    NoRefreshCredential,

    #[error("Access token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("No device credential stored; the terminal must be paired")]
    NoDeviceCredential,

    #[error("Operator credential needed; prompt for PIN")]
    OperatorCredentialNeeded,

    #[error("PIN must be exactly 6 digits")]
    InvalidPin,

    #[error("PIN rejected by server")]
    PinRejected,

    #[error("Invalid pairing code: {0}")]
    InvalidPairingCode(String),

    #[error("Device {0} is already in use by another terminal")]
    DeviceInUse(i64),

    #[error("Device credential has been revoked")]
    DeviceRevoked,

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using Tablekey's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an HTTP status error
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Error::Status {
            status,
            body: body.into(),
        }
    }

    /// True for an HTTP 401 response
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Status { status: 401, .. })
    }

    /// Errors after which the panel session cannot continue without a new login
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Error::NoRefreshCredential)
    }
}
