//! Error types for oquam.

use std::io;
use thiserror::Error;

/// Result type for oquam operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for oquam operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (open, configure).
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The link has already been closed.
    #[error("Serial link is closed")]
    LinkClosed,

    /// The device closed the stream without sending a reply.
    #[error("No reply received")]
    NoReply,

    /// A reply was received but could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The controller answered with a nonzero status code.
    #[error("Device error {code}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Device {
        /// Status code reported by the firmware.
        code: i64,
        /// Optional message carried after the status code.
        message: Option<String>,
    },

    /// No serial devices are visible to the operating system.
    #[error("No serial devices found")]
    NoSerialDevices,

    /// Every candidate was tried and none identified itself as a stage controller.
    #[error(
        "No Oquam-compatible device found ({tried} port(s) tried){}",
        .last_error.as_ref().map(|e| format!("; last error: {e}")).unwrap_or_default()
    )]
    NoDeviceFound {
        /// Number of candidates probed.
        tried: usize,
        /// Last error observed while probing.
        last_error: Option<Box<Error>>,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A discovery scan is already running.
    #[error("A port scan is already in progress")]
    ScanInProgress,

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error happened at the byte-transport level.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::LinkClosed | Self::NoReply => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }

    /// Whether a reply was received but did not have the expected structure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
