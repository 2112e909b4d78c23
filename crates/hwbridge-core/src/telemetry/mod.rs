//! Telemetry ingestion
//!
//! The stream reader turns raw link bytes into frames; telemetry frames land
//! in a fixed-size ring per channel that sensor queries read from.

mod reader;
mod ring;

pub use reader::{StreamReader, ACK_SLOT_CAPACITY};
pub use ring::{RingBuffer, TelemetryRecord, TelemetryStore};

/// Values kept per channel unless configured otherwise
pub const DEFAULT_RING_CAPACITY: usize = 10;

/// IR distance sensor stream (Sharp GP2Y0A21YK0F)
pub const CHANNEL_IR_DISTANCE: u16 = 40;

/// LM35 temperature sensor stream
pub const CHANNEL_TEMPERATURE: u16 = 50;

/// HC-SR04 ultrasonic distance stream
pub const CHANNEL_ULTRASONIC: u16 = 60;
