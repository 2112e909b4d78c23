//! Protocol errors

use thiserror::Error;

/// Errors raised by the physical link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The port could not be opened
    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// Driver message
        reason: String,
    },

    /// Driver-level failure on an open port
    #[error("Serial port error: {0}")]
    Serial(String),

    /// The device went away
    #[error("Link disconnected")]
    Disconnected,

    /// No handle is open
    #[error("Link is not open")]
    NotOpen,

    /// Read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the open failure looks like another process holding the port
    pub fn is_busy(&self) -> bool {
        match self {
            LinkError::PortUnavailable { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("busy") || reason.contains("errno 16") || reason.contains("os error 16")
            }
            _ => false,
        }
    }
}

/// Errors raised while parsing a single inbound frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Nothing between terminators
    #[error("Empty frame")]
    Empty,

    /// Telemetry frame without a `,`
    #[error("No separator in frame '{0}'")]
    MissingSeparator(String),

    /// Channel part is not a `u16`
    #[error("Invalid channel id in frame '{0}'")]
    InvalidChannelId(String),
}
