//! Settings consumed by the driver and the session engine
//!
//! Both structures mirror the JSON documents kept by the settings store and
//! are read-only from the core's point of view.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::peripheral::PeripheralKind;

/// Default connection establishment timeout in milliseconds
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 3000;

/// Default time to wait for any frame before the link is considered stale
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

/// Default first reconnect delay in milliseconds
pub const DEFAULT_MIN_RECONNECT_DELAY_MS: u64 = 3000;

/// Default upper bound for the reconnect back-off in milliseconds
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 8000;

/// Default minimum time between two accepted crossings of the same sensor
pub const DEFAULT_MIN_LAP_TIME: u64 = 500;

/// Errors loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to reach a Control Unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Transport type of the selected peripheral
    #[serde(rename = "type")]
    pub kind: Option<PeripheralKind>,
    /// Display name of the selected peripheral
    pub name: Option<String>,
    /// Transport-specific address (BLE id, serial port path)
    pub address: Option<String>,
    /// Connection establishment timeout in milliseconds
    pub connection_timeout: u64,
    /// Maximum silence on an open link in milliseconds
    pub request_timeout: u64,
    /// First reconnect delay in milliseconds
    pub min_reconnect_delay: u64,
    /// Maximum reconnect delay in milliseconds
    pub max_reconnect_delay: u64,
    /// Offer the simulated Control Unit when scanning
    pub demo_control_unit: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: None,
            name: None,
            address: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_MS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_MS,
            min_reconnect_delay: DEFAULT_MIN_RECONNECT_DELAY_MS,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY_MS,
            demo_control_unit: false,
        }
    }
}

impl ConnectionConfig {
    /// Parse from the settings store's JSON representation
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    /// Reconnect delay for the given attempt (0-based), doubling from the
    /// minimum up to the maximum delay
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let delay = self
            .min_reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay.max(self.min_reconnect_delay));
        Duration::from_millis(delay)
    }
}

/// Kind of racing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Practice,
    Qualifying,
    Race,
}

/// Options a session is constructed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceOptions {
    pub mode: SessionType,
    /// Lap limit, 0 for none
    #[serde(default)]
    pub laps: u32,
    /// Time limit in milliseconds, 0 for none
    #[serde(default)]
    pub time: u64,
    /// Only count down the time limit while the race is running
    #[serde(default)]
    pub pause: bool,
    /// Keep the session running after the first car finished
    #[serde(default)]
    pub slotmode: bool,
    /// Number of drivers for a partial grid
    #[serde(default)]
    pub drivers: Option<u8>,
    /// Autonomous car enabled
    #[serde(default)]
    pub auto: bool,
    /// Pace car enabled
    #[serde(default)]
    pub pace: bool,
    /// Minimum time between accepted crossings of one sensor
    #[serde(default = "default_min_lap_time")]
    pub min_lap_time: u64,
}

fn default_min_lap_time() -> u64 {
    DEFAULT_MIN_LAP_TIME
}

impl RaceOptions {
    /// Defaults for a session type
    pub fn new(mode: SessionType) -> Self {
        let base = Self {
            mode,
            laps: 0,
            time: 0,
            pause: false,
            slotmode: false,
            drivers: None,
            auto: false,
            pace: false,
            min_lap_time: DEFAULT_MIN_LAP_TIME,
        };
        match mode {
            SessionType::Practice => Self {
                auto: true,
                pace: true,
                ..base
            },
            SessionType::Qualifying => Self {
                time: 3 * 60 * 1000,
                ..base
            },
            SessionType::Race => Self { laps: 30, ..base },
        }
    }

    /// Parse stored options for a mode, filling missing keys from the mode
    /// defaults
    pub fn from_json(mode: SessionType, json: &str) -> Result<Self, ConfigError> {
        let mut value = serde_json::to_value(Self::new(mode))?;
        let stored: serde_json::Value = serde_json::from_str(json)?;
        if let (Some(target), serde_json::Value::Object(source)) = (value.as_object_mut(), stored) {
            for (key, v) in source {
                target.insert(key, v);
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}
