//! Daemon configuration
//!
//! ```toml
//! [general]
//! address = "::"
//! port = 4000
//! log_level = "info"
//!
//! [devices.i3]
//! port = "serial:///dev/ttyUSB0@115200"
//! firmware = "marlin"
//!
//! [devices.laser]
//! port = "tcp://192.168.1.20:23"
//! firmware = "smoothie"
//! ```

use cncd_communication::{DeviceConfig, PortSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{SettingsError, SettingsResult};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings of the daemon itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Address the command server binds to
    #[serde(default = "default_address")]
    pub address: String,
    /// Port the command server listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> String {
    "::".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// Settings of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Port specification, e.g. `serial:///dev/ttyUSB0@115200`
    pub port: String,
    /// Firmware dialect name
    #[serde(default = "default_firmware")]
    pub firmware: String,
}

fn default_firmware() -> String {
    "generic".to_string()
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,
    /// Devices by handle
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSettings>,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(SettingsError::UnsupportedFormat(path.display().to_string()));
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the first config found in the default locations
    pub fn load_default() -> SettingsResult<(PathBuf, Self)> {
        let candidates = default_locations();
        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok((path.clone(), Self::load_from_file(path)?)),
            None => Err(SettingsError::NotFound(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let level = self.general.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(SettingsError::invalid(
                "general.log_level",
                format!("'{}' is not one of {}", self.general.log_level, LOG_LEVELS.join(", ")),
            ));
        }

        if self.general.address.trim().is_empty() {
            return Err(SettingsError::invalid("general.address", "must not be empty"));
        }

        for (handle, device) in &self.devices {
            if handle.is_empty() || handle.chars().any(char::is_whitespace) {
                return Err(SettingsError::invalid(
                    format!("devices.{}", handle),
                    "handle must be non-empty and contain no whitespace",
                ));
            }
            PortSpec::parse(&device.port).map_err(|e| {
                SettingsError::invalid(format!("devices.{}.port", handle), e.to_string())
            })?;
        }

        Ok(())
    }

    /// Engine configuration of every device, ordered by handle
    pub fn device_configs(&self) -> Vec<DeviceConfig> {
        self.devices
            .iter()
            .map(|(handle, device)| {
                DeviceConfig::new(handle.clone(), device.port.clone())
                    .with_firmware(device.firmware.clone())
            })
            .collect()
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        tracing::info!("Using configuration:");
        tracing::info!("[general]");
        tracing::info!("  address = {}", self.general.address);
        tracing::info!("  port = {}", self.general.port);
        tracing::info!("  log_level = {}", self.general.log_level);
        for (handle, device) in &self.devices {
            tracing::info!("[devices.{}]", handle);
            tracing::info!("  port = {}", device.port);
            tracing::info!("  firmware = {}", device.firmware);
        }
    }
}

/// Config file locations tried in order when none is given
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from("cncd.toml")];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("cncd").join("cncd.toml"));
    }
    locations.push(PathBuf::from("/etc/cncd.toml"));
    locations
}
