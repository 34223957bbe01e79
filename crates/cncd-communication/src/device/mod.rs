//! Device engine
//!
//! One [`Device`] per configured machine. While connected it runs a sender
//! and a receiver routine around two bounded queues:
//!
//! ```text
//!  file job / inject ──► OutboundQueue (1) ──► sender ──► transport
//!                                               │
//!                           PendingAckQueue (N) ◄┘   (push before write)
//!                                  ▲
//!  transport ──► receiver ── ack ──┘ (pop one per ack or error)
//! ```
//!
//! N is the firmware's buffer depth, so at most N lines are ever
//! outstanding unacknowledged.

mod engine;
mod job;
mod queue;
mod routines;

pub use engine::Device;
pub use job::strip_comment;
pub use queue::LineQueue;

use std::sync::atomic::{AtomicU64, Ordering};

/// Static configuration of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Unique device handle
    pub handle: String,
    /// Port specification, e.g. `serial:///dev/ttyUSB0@115200`
    pub port: String,
    /// Firmware dialect name
    pub firmware: String,
}

impl DeviceConfig {
    pub fn new(handle: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            port: port.into(),
            firmware: "generic".to_string(),
        }
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = firmware.into();
        self
    }
}

/// Observable state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    /// Connected, no file job
    Idle,
    /// Connected, file job streaming
    Running,
    /// Connected, file job held at the resume gate
    Paused,
    /// Emergency abort in progress; always ends in `Disconnected`
    Aborting,
}

impl DeviceState {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            DeviceState::Idle | DeviceState::Running | DeviceState::Paused | DeviceState::Aborting
        )
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Disconnected => write!(f, "disconnected"),
            DeviceState::Connecting => write!(f, "connecting"),
            DeviceState::Idle => write!(f, "idle"),
            DeviceState::Running => write!(f, "running"),
            DeviceState::Paused => write!(f, "paused"),
            DeviceState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Line counters of the current connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounters {
    /// Lines written to the transport
    pub sent: u64,
    /// Acknowledgements received
    pub acknowledged: u64,
    /// Error or resend lines received
    pub errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    acknowledged: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.acknowledged.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LineCounters {
        LineCounters {
            sent: self.sent.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Wait until a flag is raised. False if its sender is gone.
pub(crate) async fn raised(flag: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    flag.wait_for(|raised| *raised).await.is_ok()
}
