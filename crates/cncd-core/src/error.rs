//! Error handling for cncd
//!
//! Provides the error taxonomy shared by every layer of the daemon:
//! - Connection errors (opening a serial/TCP/dummy link)
//! - Protocol errors (the firmware reported a problem)
//! - Operation conflicts (an operation is not valid in the current state)
//! - Extension failures (an observer attached to an extension point failed)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Raised when a transport cannot be opened or when the port
/// specification itself cannot be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Device path or host does not exist
    #[error("Port not found: {port}")]
    NotFound {
        /// The port that was not found.
        port: String,
    },

    /// Insufficient permissions to open the port
    #[error("Permission denied for {port}")]
    PermissionDenied {
        /// The port that could not be opened.
        port: String,
    },

    /// Remote side refused the connection
    #[error("Connection refused by {address}")]
    Refused {
        /// The refusing address.
        address: String,
    },

    /// The port specification does not match `<scheme>://<address>[@:]<parameter>`
    #[error("Malformed port specification: {spec}")]
    MalformedSpec {
        /// The offending specification.
        spec: String,
    },

    /// The scheme is not one of dummy, serial or tcp
    #[error("Unsupported scheme '{scheme}'")]
    UnsupportedScheme {
        /// The unsupported scheme.
        scheme: String,
    },

    /// Any other I/O failure while opening
    #[error("I/O error on {port}: {reason}")]
    Io {
        /// The port being opened.
        port: String,
        /// The reason reported by the operating system.
        reason: String,
    },
}

impl ConnectionError {
    /// Classify an I/O error raised while opening `port`.
    pub fn from_io(port: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ConnectionError::NotFound {
                port: port.to_string(),
            },
            ErrorKind::PermissionDenied => ConnectionError::PermissionDenied {
                port: port.to_string(),
            },
            ErrorKind::ConnectionRefused => ConnectionError::Refused {
                address: port.to_string(),
            },
            _ => ConnectionError::Io {
                port: port.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Protocol error type
///
/// Conditions reported by the firmware over an otherwise healthy link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The firmware answered with an error or resend line
    #[error("Firmware reported error: {line}")]
    FirmwareError {
        /// The raw line received from the firmware.
        line: String,
    },

    /// An acknowledgement arrived while nothing was outstanding
    #[error("Acknowledgement without outstanding command: {line}")]
    UnsolicitedAck {
        /// The raw acknowledgement line.
        line: String,
    },
}

/// Operation conflict type
///
/// Returned when an operation is requested in a state that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationConflict {
    /// `connect` on a connected device
    #[error("Device {device} already connected")]
    AlreadyConnected {
        /// The device handle.
        device: String,
    },

    /// Any link operation on a disconnected device
    #[error("Device {device} not connected")]
    NotConnected {
        /// The device handle.
        device: String,
    },

    /// `start` while a file job is already running
    #[error("Device {device} is already printing")]
    JobActive {
        /// The device handle.
        device: String,
    },

    /// `start` without a filename and nothing staged
    #[error("No file selected for {device}")]
    NoFileSelected {
        /// The device handle.
        device: String,
    },

    /// The command named a device handle that is not configured
    #[error("Unknown device {device}")]
    UnknownDevice {
        /// The requested handle.
        device: String,
    },
}

/// Extension failure type
///
/// A single observer failed while an extension point was being dispatched.
/// These never propagate into the engine; they are logged and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionFailure {
    /// The observer returned an error
    #[error("Observer '{observer}' failed in {hook}: {reason}")]
    ObserverFailed {
        /// Observer name.
        observer: String,
        /// Extension point name.
        hook: String,
        /// Error message returned by the observer.
        reason: String,
    },

    /// The observer panicked
    #[error("Observer '{observer}' panicked in {hook}")]
    ObserverPanicked {
        /// Observer name.
        observer: String,
        /// Extension point name.
        hook: String,
    },
}

/// Main error type for cncd
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation conflict
    #[error(transparent)]
    Conflict(#[from] OperationConflict),

    /// Extension failure
    #[error(transparent)]
    Extension(#[from] ExtensionFailure),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is an operation conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
