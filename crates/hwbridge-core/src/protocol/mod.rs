//! Serial Protocol Communication
//!
//! Implements the line-oriented command/telemetry protocol spoken by the
//! microcontroller firmware.
//!
//! Frames are ASCII, terminated by `;` or `\n`:
//! - host → device commands: `<code>,<value>;`
//! - device → host acks: `A` (accepted) or `E` (rejected)
//! - device → host telemetry: `<channel>,<value>` pushed unsolicited

pub mod commands;
mod error;
pub mod frame;
pub mod link;
pub mod serial;
pub mod stream;

pub use commands::{Command, CommandCode};
pub use error::{FrameError, LinkError};
pub use frame::{FrameAccumulator, InboundFrame, TelemetryValue, READY_BANNER};
pub use link::{LinkEvent, LinkManager, LinkRequest, LinkState};
pub use serial::{list_ports, PortInfo, SerialConnector};
pub use stream::{Connector, Link};

/// Default baud rate of the firmware's `Serial.begin()`
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout for a single `read_available` call in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Delay before reopening the port after a failure, in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Delay between writing a command and listening for its ack, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 50;

/// How long the dispatcher waits for an ack line, in milliseconds
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;

/// Maximum number of bytes pulled from the port per read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256;

/// Frame terminator used when writing commands
pub const COMMAND_TERMINATOR: u8 = b';';

/// Terminators accepted on inbound frames
pub const FRAME_TERMINATORS: [u8; 2] = [b';', b'\n'];
