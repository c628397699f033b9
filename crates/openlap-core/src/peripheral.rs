//! Discoverable Control Unit endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConnectionConfig;

/// Transport family of a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeripheralKind {
    #[serde(rename = "ble")]
    Ble,
    #[serde(rename = "serial")]
    Serial,
    #[serde(rename = "web-bluetooth")]
    WebBluetooth,
    #[serde(rename = "demo")]
    Demo,
}

impl PeripheralKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeripheralKind::Ble => "ble",
            PeripheralKind::Serial => "serial",
            PeripheralKind::WebBluetooth => "web-bluetooth",
            PeripheralKind::Demo => "demo",
        }
    }
}

impl fmt::Display for PeripheralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical endpoint a Control Unit can be reached through.
///
/// Two peripherals are the same device when kind and address match; the
/// name is for display only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peripheral {
    #[serde(rename = "type")]
    pub kind: PeripheralKind,
    pub name: String,
    pub address: Option<String>,
}

/// Identity used to deduplicate scan results
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId {
    pub kind: PeripheralKind,
    pub address: Option<String>,
}

impl Peripheral {
    pub fn new(kind: PeripheralKind, name: impl Into<String>, address: Option<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            address,
        }
    }

    /// Identity of this peripheral
    pub fn id(&self) -> PeripheralId {
        PeripheralId {
            kind: self.kind,
            address: self.address.clone(),
        }
    }

    /// Whether both refer to the same device
    pub fn equals(&self, other: &Peripheral) -> bool {
        self.kind == other.kind && self.address == other.address
    }

    /// Whether this is the device a stored connection refers to
    pub fn matches(&self, config: &ConnectionConfig) -> bool {
        config.kind == Some(self.kind) && config.address == self.address
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} ({} {})", self.name, self.kind, address),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}
