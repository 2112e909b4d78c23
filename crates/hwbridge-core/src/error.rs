//! Caller-facing errors
//!
//! Link faults are handled inside the bridge's own loops and never show up
//! here. A command timeout is not an error either; see
//! [`Awaited`](crate::dispatch::Awaited).

use thiserror::Error;

/// Errors returned to callers of the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// An operation argument is out of range
    #[error("Invalid argument for {operation}: {reason}")]
    InvalidCommandArgument {
        /// Operation that rejected the argument
        operation: String,
        /// What was wrong with it
        reason: String,
    },

    /// Key fails the length or character-set check
    #[error("Invalid correlation key '{0}'")]
    InvalidKey(String),

    /// Key already pending, abandoned after a timeout, or answered
    #[error("Correlation key '{0}' is already in use")]
    DuplicateKey(String),

    /// The hardware this operation needs is not connected
    #[error("Operation '{0}' is disabled for the current hardware")]
    Disabled(String),

    /// The bridge was shut down
    #[error("Bridge has been stopped")]
    Stopped,

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub(crate) fn invalid_argument(operation: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidCommandArgument {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}
