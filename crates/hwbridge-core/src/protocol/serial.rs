//! Serial port handling
//!
//! Port discovery, the serial [`Connector`] and a best-effort diagnostic for
//! ports held by another process.

use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::stream::SerialLink;
use super::{Connector, Link, LinkError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " [{:04x}:{:04x}]", vid, pid)?;
        }
        if let Some(product) = self.product.as_deref().or(self.manufacturer.as_deref()) {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Device families in the order they are offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PortFamily {
    /// CDC-ACM boards (Uno R3, Leonardo, most native-USB MCUs)
    Acm,
    /// USB-serial bridges (CH340, FTDI, CP210x)
    UsbSerial,
    Other,
}

/// Family and index of a port, e.g. `/dev/ttyACM3` → `(Acm, Some(3))`
fn classify(name: &str) -> (PortFamily, Option<u32>) {
    let node = name.rsplit('/').next().unwrap_or(name);
    [("ttyACM", PortFamily::Acm), ("ttyUSB", PortFamily::UsbSerial)]
        .into_iter()
        .find_map(|(prefix, family)| {
            node.strip_prefix(prefix)
                .map(|index| (family, index.parse().ok()))
        })
        .unwrap_or((PortFamily::Other, None))
}

/// Merge enumerated ports with bare device nodes, dropping duplicates.
/// Enumerated entries win since they carry USB metadata.
fn merge_ports(enumerated: Vec<PortInfo>, nodes: Vec<String>) -> Vec<PortInfo> {
    let mut ports = enumerated;
    for node in nodes {
        if !ports.iter().any(|p| p.name == node) {
            ports.push(PortInfo::bare(node));
        }
    }
    ports.sort_by(|a, b| {
        let (fa, ia) = classify(&a.name);
        let (fb, ib) = classify(&b.name);
        fa.cmp(&fb)
            .then(ia.unwrap_or(u32::MAX).cmp(&ib.unwrap_or(u32::MAX)))
            .then_with(|| a.name.cmp(&b.name))
    });
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// `/dev/ttyACM*` and `/dev/ttyUSB*` nodes; udev-less boards are missing
/// from the enumeration API
#[cfg(target_os = "linux")]
fn device_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|node| classify(node).0 != PortFamily::Other)
        .map(|node| format!("/dev/{}", node))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn device_nodes() -> Vec<String> {
    Vec::new()
}

/// Serial ports on this host, boards first
pub fn list_ports() -> Vec<PortInfo> {
    let enumerated = match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            debug!(error = %e, "serial port enumeration failed");
            Vec::new()
        }
    };
    merge_ports(enumerated, device_nodes())
}

/// Report which process holds `port`, using `lsof`.
///
/// Best effort: returns `None` when lsof is missing, fails, or takes longer
/// than a second.
#[cfg(unix)]
pub async fn port_holder(port: &str) -> Option<String> {
    let lookup = tokio::process::Command::new("lsof")
        .arg(port)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(Duration::from_secs(1), lookup)
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Not supported off unix
#[cfg(not(unix))]
pub async fn port_holder(_port: &str) -> Option<String> {
    None
}

/// Opens the configured serial port (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Connector for `port_name`; a zero baud rate selects the default
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Override the driver-level timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open_stream(&self) -> Result<SerialStream, LinkError> {
        let baud = if self.baud_rate == 0 {
            DEFAULT_BAUD_RATE
        } else {
            self.baud_rate
        };
        tokio_serial::new(&self.port_name, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| LinkError::PortUnavailable {
                port: self.port_name.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn connect(&self) -> Result<Box<dyn Link>, LinkError> {
        let mut port = self.open_stream()?;

        // Keep DTR asserted so the board is not pushed back into its bootloader
        if let Err(e) = port.write_data_terminal_ready(true) {
            debug!(port = %self.port_name, error = %e, "failed to set DTR high (continuing)");
        }

        Ok(Box::new(SerialLink::new(port)))
    }
}
