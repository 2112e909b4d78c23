//! Protocol commands
//!
//! Defines the command codes understood by the firmware and the wire
//! encoding of a command frame.

use serde::{Deserialize, Serialize};

use super::COMMAND_TERMINATOR;

/// Command codes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    /// Sound the piezo buzzer (value = duration in ms)
    Buzzer,

    /// Move the servo (value = angle in degrees, 0-180)
    Servo,

    /// Drive a digital output (value = 0 or 1)
    DigitalOutput,

    /// Any other numeric code, passed through unchanged
    Raw(u16),
}

impl CommandCode {
    /// Get the numeric code written on the wire
    pub fn code(&self) -> u16 {
        match self {
            CommandCode::Buzzer => 2,
            CommandCode::Servo => 20,
            CommandCode::DigitalOutput => 30,
            CommandCode::Raw(code) => *code,
        }
    }

    /// Map a numeric code back to a known command
    pub fn from_code(code: u16) -> Self {
        match code {
            2 => CommandCode::Buzzer,
            20 => CommandCode::Servo,
            30 => CommandCode::DigitalOutput,
            other => CommandCode::Raw(other),
        }
    }
}

impl From<u16> for CommandCode {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

/// A command ready to be written to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command code
    pub code: CommandCode,
    /// Integer argument
    pub value: i32,
}

impl Command {
    /// Build a command from a code (or raw `u16`) and its argument
    pub fn new(code: impl Into<CommandCode>, value: i32) -> Self {
        Self {
            code: code.into(),
            value,
        }
    }

    /// Encode as `<code>,<value>;`
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = format!("{},{}", self.code.code(), self.value).into_bytes();
        frame.push(COMMAND_TERMINATOR);
        frame
    }
}
