//! # cncd Settings
//!
//! Configuration model of the daemon: the command server's bind address
//! and log level, and one port/firmware entry per device. Loaded from TOML
//! or JSON and validated before use.

pub mod config;
pub mod error;

pub use config::{default_locations, Config, DeviceSettings, GeneralSettings};
pub use error::{SettingsError, SettingsResult};
