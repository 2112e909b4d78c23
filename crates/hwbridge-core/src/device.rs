//! Device operations
//!
//! The calling layer on top of the bridge: validates arguments, checks the
//! capability registry, submits commands and averages sensor history into
//! human-readable readings. An HTTP or agent front end maps its tools and
//! resources one-to-one onto these methods.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bridge::Bridge;
use crate::capability::{
    CapabilityRegistry, OP_CONTROL_SERVO, OP_DIGITAL_OUTPUT, OP_IR_DISTANCE, OP_PIEZO_BEEP,
    OP_TEMP_LM35, OP_ULTRASONIC_DISTANCE,
};
use crate::dispatch::{Awaited, CommandResponse, CorrelationKey};
use crate::error::BridgeError;
use crate::protocol::{CommandCode, TelemetryValue};
use crate::telemetry::{CHANNEL_IR_DISTANCE, CHANNEL_TEMPERATURE, CHANNEL_ULTRASONIC};

/// How long a beep waits for its ack
pub const BEEP_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a servo move waits for its ack
pub const SERVO_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a digital output change waits for its ack
pub const OUTPUT_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest angle the servo accepts
pub const SERVO_MAX_ANGLE: i32 = 180;
/// Largest argument the firmware can parse (16-bit `int`)
pub const MAX_COMMAND_VALUE: i32 = i16::MAX as i32;

/// Result of an actuator operation
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    /// Operation that ran
    pub operation: &'static str,
    /// Human-readable summary
    pub message: String,
    /// Key the response was recorded under
    pub key: CorrelationKey,
    /// Raw ack line, if the device answered in time
    pub response: Option<String>,
    /// Set when the device did not answer usefully
    pub warning: Option<String>,
}

impl ActionOutcome {
    fn new(operation: &'static str, message: String, key: CorrelationKey, awaited: Awaited) -> Self {
        let (response, warning) = match awaited {
            Awaited::Response(CommandResponse::Ack(line)) => {
                let warning = (line != "A").then(|| format!("device rejected command ({})", line));
                (Some(line), warning)
            }
            Awaited::Response(CommandResponse::Silent) => {
                (None, Some("no response from device".to_string()))
            }
            Awaited::Response(CommandResponse::Undelivered(reason)) => {
                (None, Some(format!("command not delivered: {}", reason)))
            }
            Awaited::TimedOut => (None, Some("no response from device (timeout)".to_string())),
        };
        Self {
            operation,
            message,
            key,
            response,
            warning,
        }
    }

    /// The device acknowledged with `A`
    pub fn is_success(&self) -> bool {
        self.response.as_deref() == Some("A")
    }
}

/// A telemetry-backed sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSpec {
    /// Operation gating the read
    pub operation: &'static str,
    /// Telemetry channel the firmware reports on
    pub channel: u16,
    /// Number of most recent values averaged
    pub window: usize,
    /// Unit label for display
    pub unit: &'static str,
}

/// Sharp GP2Y0A21YK0F IR distance sensor
pub const IR_DISTANCE: SensorSpec = SensorSpec {
    operation: OP_IR_DISTANCE,
    channel: CHANNEL_IR_DISTANCE,
    window: 10,
    unit: "cm",
};

/// LM35 temperature sensor
pub const TEMP_LM35: SensorSpec = SensorSpec {
    operation: OP_TEMP_LM35,
    channel: CHANNEL_TEMPERATURE,
    window: 5,
    unit: "°C",
};

/// HC-SR04 ultrasonic distance sensor
pub const ULTRASONIC_DISTANCE: SensorSpec = SensorSpec {
    operation: OP_ULTRASONIC_DISTANCE,
    channel: CHANNEL_ULTRASONIC,
    window: 8,
    unit: "cm",
};

/// Averaged sensor reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SensorReading {
    /// Nothing received on the channel yet
    NoValue,
    /// Recent values include non-numeric data
    Invalid,
    /// Mean of the recent values
    Value {
        /// Arithmetic mean
        average: f64,
        /// Unit label
        unit: &'static str,
    },
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorReading::NoValue => f.write_str("No value"),
            SensorReading::Invalid => f.write_str("Invalid value(s)"),
            SensorReading::Value { average, unit } => write!(f, "{:.2} {}", average, unit),
        }
    }
}

/// Average the last `window` values (all of them when fewer are available)
pub fn average_recent(values: &[TelemetryValue], window: usize, unit: &'static str) -> SensorReading {
    if values.is_empty() {
        return SensorReading::NoValue;
    }
    let start = values.len().saturating_sub(window.max(1));
    let recent = &values[start..];
    let numbers: Option<Vec<f64>> = recent.iter().map(TelemetryValue::as_f64).collect();
    match numbers {
        Some(numbers) => SensorReading::Value {
            average: numbers.iter().sum::<f64>() / numbers.len() as f64,
            unit,
        },
        None => SensorReading::Invalid,
    }
}

/// Device operations over a shared bridge
#[derive(Clone)]
pub struct Device {
    bridge: Arc<Bridge>,
    capabilities: Arc<CapabilityRegistry>,
}

impl Device {
    /// Wrap a running bridge and the registry that gates it
    pub fn new(bridge: Arc<Bridge>, capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            bridge,
            capabilities,
        }
    }

    /// Underlying bridge
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Capability registry
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    async fn act(
        &self,
        operation: &'static str,
        code: CommandCode,
        value: i32,
        timeout: Duration,
        message: String,
    ) -> Result<ActionOutcome, BridgeError> {
        let key = self.bridge.enqueue_write(code, value)?;
        let awaited = self.bridge.await_response(&key, timeout).await;
        let outcome = ActionOutcome::new(operation, message, key, awaited);
        info!(
            operation,
            key = %outcome.key,
            response = ?outcome.response,
            warning = ?outcome.warning,
            "operation finished"
        );
        Ok(outcome)
    }

    /// Sound the buzzer for `duration_ms`
    pub async fn beep(&self, duration_ms: i32) -> Result<ActionOutcome, BridgeError> {
        self.capabilities.ensure_enabled(OP_PIEZO_BEEP)?;
        if duration_ms <= 0 {
            return Err(BridgeError::invalid_argument(
                OP_PIEZO_BEEP,
                "duration must be > 0",
            ));
        }
        if duration_ms > MAX_COMMAND_VALUE {
            return Err(BridgeError::invalid_argument(
                OP_PIEZO_BEEP,
                format!("duration must be <= {} ms", MAX_COMMAND_VALUE),
            ));
        }
        self.act(
            OP_PIEZO_BEEP,
            CommandCode::Buzzer,
            duration_ms,
            BEEP_TIMEOUT,
            format!("Sent beep for {}ms", duration_ms),
        )
        .await
    }

    /// Move the servo to `angle` degrees
    pub async fn set_servo(&self, angle: i32) -> Result<ActionOutcome, BridgeError> {
        self.capabilities.ensure_enabled(OP_CONTROL_SERVO)?;
        if !(0..=SERVO_MAX_ANGLE).contains(&angle) {
            return Err(BridgeError::invalid_argument(
                OP_CONTROL_SERVO,
                format!("position must be between 0 and {} degrees", SERVO_MAX_ANGLE),
            ));
        }
        self.act(
            OP_CONTROL_SERVO,
            CommandCode::Servo,
            angle,
            SERVO_TIMEOUT,
            format!("Servo set to {} degrees", angle),
        )
        .await
    }

    /// Switch the digital output on or off
    pub async fn set_digital_output(&self, on: bool) -> Result<ActionOutcome, BridgeError> {
        self.capabilities.ensure_enabled(OP_DIGITAL_OUTPUT)?;
        self.act(
            OP_DIGITAL_OUTPUT,
            CommandCode::DigitalOutput,
            i32::from(on),
            OUTPUT_TIMEOUT,
            format!("Output switched {}", if on { "on" } else { "off" }),
        )
        .await
    }

    /// Average of the sensor's recent history
    pub fn read_sensor(&self, sensor: &SensorSpec) -> Result<SensorReading, BridgeError> {
        self.capabilities.ensure_enabled(sensor.operation)?;
        let values = self.bridge.recent_values(sensor.channel);
        Ok(average_recent(&values, sensor.window, sensor.unit))
    }

    /// IR distance in cm
    pub fn ir_distance(&self) -> Result<SensorReading, BridgeError> {
        self.read_sensor(&IR_DISTANCE)
    }

    /// LM35 temperature in °C
    pub fn temperature(&self) -> Result<SensorReading, BridgeError> {
        self.read_sensor(&TEMP_LM35)
    }

    /// Ultrasonic distance in cm
    pub fn ultrasonic_distance(&self) -> Result<SensorReading, BridgeError> {
        self.read_sensor(&ULTRASONIC_DISTANCE)
    }
}
