//! # hwbridge Core Library
//!
//! Transport core for bridging software callers to a microcontroller over a
//! serial link.

//!
//! This library provides:
//! - A resilient link manager that opens, watches and reopens the port
//! - A telemetry reader that frames the inbound byte stream into per-channel ring buffers
//! - A sequential command dispatcher with correlation-keyed response waiting
//! - Device operations (buzzer, servo, digital output, sensor averages) gated by a capability registry
//! - A simulated board for running without hardware
//!
//! ## Wire format
//!
//! - Commands: `<code>,<value>;` (e.g. `20,90;` moves the servo to 90°)
//! - Acks: `A` or `E` on their own line
//! - Telemetry: `<channel>,<value>;` pushed unsolicited (e.g. `40,512;`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use hwbridge_core::prelude::*;
//! use std::time::Duration;
//!
//! let bridge = Bridge::open_serial(BridgeConfig::for_port("/dev/ttyACM0"))?;
//!
//! let key = CorrelationKey::new("s1")?;
//! bridge.submit(CommandCode::Servo, 90, Some(key.clone()))?;
//! match bridge.await_response(&key, Duration::from_secs(10)).await {
//!     Awaited::Response(response) => println!("device said {:?}", response),
//!     Awaited::TimedOut => println!("no response"),
//! }
//!
//! println!("IR history: {:?}", bridge.recent_values(40));
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bridge;
pub mod capability;
pub mod config;
pub mod demo;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::capability::{CapabilityRegistry, OperationKind, OPERATIONS};
    pub use crate::config::BridgeConfig;
    pub use crate::demo::SimulatedDevice;
    pub use crate::device::{ActionOutcome, Device, SensorReading};
    pub use crate::dispatch::{Awaited, CommandResponse, CorrelationKey};
    pub use crate::error::BridgeError;
    pub use crate::protocol::{
        list_ports, Command, CommandCode, LinkState, PortInfo, TelemetryValue,
    };
    pub use crate::telemetry::{TelemetryRecord, TelemetryStore};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
