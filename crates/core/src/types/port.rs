//! Descriptive metadata for a serial endpoint

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport behind a serial endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortKind {
    Usb {
        vid: u16,
        pid: u16,
        manufacturer: Option<String>,
        product: Option<String>,
        serial_number: Option<String>,
    },
    Bluetooth,
    Pci,
    /// In-process device (loopback, tests)
    Virtual,
    Unknown,
}

/// Metadata about one serial endpoint
///
/// This is display information only. Two `PortInfo` values with the same
/// path may describe different device handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// OS path or name (`/dev/ttyUSB0`, `COM3`)
    pub path: String,
    pub kind: PortKind,
}

impl PortInfo {
    pub fn new(path: impl Into<String>, kind: PortKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Virtual port with the given name
    pub fn virtual_port(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Virtual)
    }

    /// Short description of the transport, e.g. `USB 0403:6001 FT232R`
    pub fn description(&self) -> String {
        match &self.kind {
            PortKind::Usb {
                vid, pid, product, ..
            } => match product {
                Some(product) => format!("USB {:04x}:{:04x} {}", vid, pid, product),
                None => format!("USB {:04x}:{:04x}", vid, pid),
            },
            PortKind::Bluetooth => "Bluetooth".to_string(),
            PortKind::Pci => "PCI".to_string(),
            PortKind::Virtual => "Virtual".to_string(),
            PortKind::Unknown => "Unknown".to_string(),
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.description())
    }
}
