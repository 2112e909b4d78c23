//! Capability registry
//!
//! Each device operation needs a particular part to be wired to the board.
//! The registry maps operation names to enabled/disabled and is recomputed
//! whenever the set of connected parts changes; operations consult it before
//! touching the link.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tracing::info;

use crate::error::BridgeError;

/// Sound the piezo buzzer
pub const OP_PIEZO_BEEP: &str = "piezo_beep";
/// Move the servo
pub const OP_CONTROL_SERVO: &str = "control_servo";
/// Switch the digital output pin
pub const OP_DIGITAL_OUTPUT: &str = "digital_output";
/// Read the IR distance sensor
pub const OP_IR_DISTANCE: &str = "ir_distance";
/// Read the LM35 temperature sensor
pub const OP_TEMP_LM35: &str = "temp_lm35";
/// Read the ultrasonic distance sensor
pub const OP_ULTRASONIC_DISTANCE: &str = "ultrasonic_distance";

/// Whether an operation acts on the device or reads from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Sends a command (actuator)
    Tool,
    /// Reads telemetry (sensor)
    Resource,
}

/// An operation and the part it depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    /// Operation name, also the registry key
    pub name: &'static str,
    /// Actuator or sensor
    pub kind: OperationKind,
    /// Part id as it appears in the hardware mappings
    pub hardware: &'static str,
    /// Resource URI for sensor reads
    pub uri: Option<&'static str>,
}

/// Every operation the bridge exposes
pub const OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: OP_PIEZO_BEEP,
        kind: OperationKind::Tool,
        hardware: "Piezo Buzzer",
        uri: None,
    },
    OperationSpec {
        name: OP_CONTROL_SERVO,
        kind: OperationKind::Tool,
        hardware: "Micro Servo - SG90",
        uri: None,
    },
    OperationSpec {
        name: OP_DIGITAL_OUTPUT,
        kind: OperationKind::Tool,
        hardware: "LED",
        uri: None,
    },
    OperationSpec {
        name: OP_IR_DISTANCE,
        kind: OperationKind::Resource,
        hardware: "IR-GP2Y0A21YK0F",
        uri: Some("sensor://ir/GP2Y0A21YK0F"),
    },
    OperationSpec {
        name: OP_TEMP_LM35,
        kind: OperationKind::Resource,
        hardware: "LM35",
        uri: Some("sensor://temp/LM35"),
    },
    OperationSpec {
        name: OP_ULTRASONIC_DISTANCE,
        kind: OperationKind::Resource,
        hardware: "HC-SR04",
        uri: Some("sensor://ultrasonic/HC-SR04"),
    },
];

/// Look up an operation by name
pub fn operation(name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS.iter().find(|spec| spec.name == name)
}

/// One entry of the hardware mappings document
#[derive(Debug, Clone, Default, Deserialize)]
struct HardwareMapping {
    #[serde(rename = "partId", default)]
    part_id: String,
}

/// Extract the set of connected part ids from a mappings document
/// (`[{"partId": "LM35", ...}, ...]`)
pub fn hardware_from_mappings(json: &str) -> Result<HashSet<String>, BridgeError> {
    let mappings: Vec<HardwareMapping> =
        serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
    Ok(mappings
        .into_iter()
        .map(|m| m.part_id)
        .filter(|id| !id.is_empty())
        .collect())
}

/// Enabled state of every operation
#[derive(Debug)]
pub struct CapabilityRegistry {
    enabled: RwLock<BTreeMap<&'static str, bool>>,
}

impl CapabilityRegistry {
    /// Registry with every operation disabled
    pub fn new() -> Self {
        Self {
            enabled: RwLock::new(OPERATIONS.iter().map(|spec| (spec.name, false)).collect()),
        }
    }

    /// Registry computed from a set of connected parts
    pub fn with_hardware(available: &HashSet<String>) -> Self {
        let registry = Self::new();
        registry.recompute(available);
        registry
    }

    /// Registry with every operation enabled
    pub fn all_enabled() -> Self {
        Self {
            enabled: RwLock::new(OPERATIONS.iter().map(|spec| (spec.name, true)).collect()),
        }
    }

    /// Refresh enabled flags from the set of connected parts.
    /// Returns the operations whose state changed.
    pub fn recompute(&self, available: &HashSet<String>) -> Vec<(&'static str, bool)> {
        let mut enabled = self.enabled.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = Vec::new();
        for spec in OPERATIONS {
            let now = available.contains(spec.hardware);
            let before = enabled.insert(spec.name, now);
            if before != Some(now) {
                info!(operation = spec.name, hardware = spec.hardware, enabled = now, "capability changed");
                changed.push((spec.name, now));
            }
        }
        changed
    }

    /// Whether `name` is currently enabled; unknown names are not
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// `Err(Disabled)` unless `name` is enabled
    pub fn ensure_enabled(&self, name: &str) -> Result<(), BridgeError> {
        if self.is_enabled(name) {
            Ok(())
        } else {
            Err(BridgeError::Disabled(name.to_string()))
        }
    }

    /// Names of enabled operations, sorted
    pub fn enabled_operations(&self) -> Vec<&'static str> {
        self.enabled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| *name)
            .collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parts(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_starts_disabled() {
        let registry = CapabilityRegistry::new();
        assert!(registry.enabled_operations().is_empty());
        assert_eq!(
            registry.ensure_enabled(OP_PIEZO_BEEP),
            Err(BridgeError::Disabled(OP_PIEZO_BEEP.to_string()))
        );
    }

    #[test]
    fn test_recompute_reports_changes() {
        let registry = CapabilityRegistry::new();
        let changed = registry.recompute(&parts(&["Piezo Buzzer", "IR-GP2Y0A21YK0F"]));
        assert_eq!(changed, vec![(OP_PIEZO_BEEP, true), (OP_IR_DISTANCE, true)]);
        assert_eq!(registry.enabled_operations(), vec![OP_IR_DISTANCE, OP_PIEZO_BEEP]);

        let changed = registry.recompute(&parts(&["IR-GP2Y0A21YK0F", "LM35"]));
        assert_eq!(changed, vec![(OP_PIEZO_BEEP, false), (OP_TEMP_LM35, true)]);
        assert!(!registry.is_enabled(OP_PIEZO_BEEP));
        assert!(registry.ensure_enabled(OP_TEMP_LM35).is_ok());
    }

    #[test]
    fn test_unknown_operation_is_disabled() {
        let registry = CapabilityRegistry::all_enabled();
        assert!(registry.is_enabled(OP_CONTROL_SERVO));
        assert!(!registry.is_enabled("self_destruct"));
    }

    #[test]
    fn test_mappings_document() {
        let json = r#"[
            {"partId": "Micro Servo - SG90", "pin": "D9"},
            {"partId": "", "pin": "A0"},
            {"pin": "D3"},
            {"partId": "HC-SR04"}
        ]"#;
        let available = hardware_from_mappings(json).unwrap();
        assert_eq!(available, parts(&["Micro Servo - SG90", "HC-SR04"]));

        let registry = CapabilityRegistry::with_hardware(&available);
        assert_eq!(
            registry.enabled_operations(),
            vec![OP_CONTROL_SERVO, OP_ULTRASONIC_DISTANCE]
        );
        assert!(hardware_from_mappings("{}").is_err());
    }

    #[test]
    fn test_operation_lookup() {
        let spec = operation(OP_IR_DISTANCE).unwrap();
        assert_eq!(spec.kind, OperationKind::Resource);
        assert_eq!(spec.uri, Some("sensor://ir/GP2Y0A21YK0F"));
        assert!(operation("nope").is_none());
    }
}
