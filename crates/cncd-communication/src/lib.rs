//! # cncd Communication
//!
//! Per-device communication engine for the cncd daemon.
//!
//! - [`firmware`]: firmware dialects (prompt, buffer depth, ack/error rules)
//! - [`transport`]: dummy, serial and TCP connections behind one [`Connector`] trait
//! - [`device`]: the flow-controlled [`Device`] engine with pause, stop and abort

pub mod device;
pub mod firmware;
pub mod transport;

pub use device::{Device, DeviceConfig, DeviceState, LineCounters, LineQueue};
pub use firmware::{DialectKind, FirmwareDialect};
pub use transport::{
    Connection, Connector, LineWriter, LinkReporter, LinkSink, PortConnector, PortSpec, Scheme,
};
