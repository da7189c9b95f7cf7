//! Error types for bbconsole.

use thiserror::Error;

/// Result type for bbconsole operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bbconsole operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level connect failure.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Device exposes neither the console nor the firmware-update service.
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Input text contains characters outside 7-bit ASCII.
    #[error("Only ASCII characters can be sent to the console")]
    Encoding,

    /// Operation requires an active console session.
    #[error("No active session")]
    NotConnected,

    /// The session is in recovery mode; console writes are disabled.
    #[error("Console writes are disabled in recovery mode")]
    RecoveryMode,

    /// The transport failed to issue an operation.
    #[error("Transport error: {0}")]
    Transport(String),
}
