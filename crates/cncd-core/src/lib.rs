//! # cncd Core
//!
//! Core types shared by the cncd crates: the error taxonomy, the
//! extension-point registry devices report to, and the per-device status
//! store frontends read from.

pub mod error;
pub mod hooks;
pub mod status;

pub use error::{
    ConnectionError, Error, ExtensionFailure, OperationConflict, ProtocolError, Result,
};

pub use hooks::{DeviceObserver, HookRegistry, ObserverHandle, Progress, ProgressObserver};

pub use status::{keys, MemoryStatusStore, StatusStore, StatusUpdate, StatusValue};
