//! Inbound frame handling
//!
//! Splits the raw byte stream coming off the link into terminator-delimited
//! frames and classifies each one as an ack, a notice or a telemetry record.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{FrameError, FRAME_TERMINATORS};

/// Line printed by the firmware once it has finished booting
pub const READY_BANNER: &str = "READY";

/// Value carried by a telemetry frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Payload without a decimal point
    Int(i64),
    /// Payload with a decimal point
    Float(f64),
    /// Non-numeric payload, kept verbatim
    Text(String),
}

impl TelemetryValue {
    /// Parse a value: integer when there is no decimal point, float otherwise,
    /// raw text when neither parse succeeds
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let parsed = if raw.contains('.') {
            raw.parse::<f64>().ok().map(TelemetryValue::Float)
        } else {
            raw.parse::<i64>().ok().map(TelemetryValue::Int)
        };
        parsed.unwrap_or_else(|| TelemetryValue::Text(raw.to_string()))
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Int(v) => Some(*v as f64),
            TelemetryValue::Float(v) => Some(*v),
            TelemetryValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Int(v) => write!(f, "{}", v),
            TelemetryValue::Float(v) => write!(f, "{}", v),
            TelemetryValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::Int(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Float(v)
    }
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Acknowledgment of the command in flight (raw line, e.g. `A` or `E`)
    Ack(String),
    /// Informational line from the firmware, e.g. the boot banner
    Notice(String),
    /// Unsolicited sensor reading
    Telemetry { channel: u16, value: TelemetryValue },
}

impl InboundFrame {
    /// Classify a trimmed frame.
    ///
    /// Frames equal to one of `ack_tokens` are acks, the boot banner is a
    /// notice, and everything else must be `<channel>,<value>`.
    pub fn parse(raw: &str, ack_tokens: &[String]) -> Result<Self, FrameError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FrameError::Empty);
        }
        if ack_tokens.iter().any(|token| token == raw) {
            return Ok(InboundFrame::Ack(raw.to_string()));
        }
        if raw == READY_BANNER {
            return Ok(InboundFrame::Notice(raw.to_string()));
        }
        let (channel, value) = parse_telemetry(raw)?;
        Ok(InboundFrame::Telemetry { channel, value })
    }
}

/// Parse `<channel>,<value>` into its parts
pub fn parse_telemetry(raw: &str) -> Result<(u16, TelemetryValue), FrameError> {
    let (id, value) = raw
        .split_once(',')
        .ok_or_else(|| FrameError::MissingSeparator(raw.to_string()))?;
    let channel = id
        .trim()
        .parse::<u16>()
        .map_err(|_| FrameError::InvalidChannelId(raw.to_string()))?;
    Ok((channel, TelemetryValue::parse(value)))
}

/// Byte accumulator that yields complete frames as terminators arrive
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Remove and return the next complete, non-empty frame.
    ///
    /// Whichever of `;` and `\n` occurs first ends the frame. Bytes are
    /// decoded lossily and trimmed; empty frames are skipped.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let pos = self
                .buf
                .iter()
                .position(|b| FRAME_TERMINATORS.contains(b))?;
            let frame: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&frame[..pos]);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    /// Append a chunk and drain every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.extend(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes waiting for a terminator
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// No partial frame is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
