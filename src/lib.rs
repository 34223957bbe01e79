//! # cncd
//!
//! A daemon that streams G-code to CNC machines and 3D printers.
//!
//! ## Architecture
//!
//! cncd is organized as a workspace with multiple crates:
//!
//! 1. **cncd-core** - Error taxonomy, extension points, status store
//! 2. **cncd-communication** - Transports, firmware dialects, the per-device engine
//! 3. **cncd-settings** - Configuration file loading and validation
//! 4. **cncd** - The daemon binary: command dispatcher and line server
//!
//! Each configured device runs its own engine: a sender task windowing
//! lines onto the link, a receiver task matching acknowledgements, and at
//! most one file job feeding the sender. Clients talk to the daemon over a
//! plain TCP line protocol (see [`server`]).

pub mod dispatcher;
pub mod server;

pub use dispatcher::Dispatcher;

pub use cncd_communication::{
    Device, DeviceConfig, DeviceState, DialectKind, FirmwareDialect, PortConnector, PortSpec,
};
pub use cncd_core::{Error, HookRegistry, MemoryStatusStore, ProgressObserver, Result};
pub use cncd_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
