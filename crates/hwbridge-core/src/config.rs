//! Bridge configuration
//!
//! Static settings supplied at startup. Every field has a default so a
//! config file only needs to name the port.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BridgeError;
use crate::protocol::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_READ_CHUNK_SIZE, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SETTLE_DELAY_MS,
};
use crate::telemetry::DEFAULT_RING_CAPACITY;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "/dev/cu.usbmodem101", "COM3")
    pub port_name: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Timeout of a single read on the link in milliseconds
    pub read_timeout_ms: u64,

    /// Delay before reopening the port after a failure in milliseconds
    pub retry_delay_ms: u64,

    /// Delay between writing a command and listening for its ack
    pub settle_delay_ms: u64,

    /// How long the dispatcher waits for an ack line
    pub ack_timeout_ms: u64,

    /// Values kept per telemetry channel
    pub ring_capacity: usize,

    /// Maximum bytes pulled from the link per read
    pub read_chunk_size: usize,

    /// Lines the firmware uses to acknowledge commands
    pub ack_tokens: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ring_capacity: DEFAULT_RING_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            ack_tokens: vec!["A".to_string(), "E".to_string()],
        }
    }
}

impl BridgeConfig {
    /// Default configuration for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.baud_rate == 0 {
            return Err(BridgeError::Config("baud_rate must be > 0".into()));
        }
        if self.ring_capacity == 0 {
            return Err(BridgeError::Config("ring_capacity must be > 0".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(BridgeError::Config("read_chunk_size must be > 0".into()));
        }
        Ok(())
    }

    /// [`read_timeout_ms`](Self::read_timeout_ms) as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// [`retry_delay_ms`](Self::retry_delay_ms) as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// [`settle_delay_ms`](Self::settle_delay_ms) as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// [`ack_timeout_ms`](Self::ack_timeout_ms) as a `Duration`
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}
