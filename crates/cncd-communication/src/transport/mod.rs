//! Transport connections
//!
//! A transport opens a line-oriented channel to a device and delivers every
//! received line to the engine's inbound channel. The engine writes lines
//! through a [`LineWriter`] and learns of link loss through a
//! [`LinkReporter`], which fires at most once per connection.
//!
//! Transports:
//! - `dummy://`: in-process device acknowledging every line
//! - `serial://`: serial port via the `serialport` crate
//! - `tcp://`: TCP console (Smoothieware telnet, ser2net, ...)

pub mod dummy;
pub mod framing;
pub mod mock;
pub mod serial;
pub mod spec;
pub mod tcp;

pub use framing::LineFramer;
pub use spec::{PortSpec, Scheme};

use async_trait::async_trait;
use cncd_core::ConnectionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

/// Capacity of the inbound line channel between a transport and its device
pub const INBOUND_CAPACITY: usize = 64;

/// Back-channel a connection uses to report loss of link
///
/// Cloned into every task of a connection. The first `report` wins;
/// later reports and reports after `silence` are dropped.
#[derive(Clone, Default)]
pub struct LinkReporter {
    slot: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl LinkReporter {
    /// Create a reporter and the receiving end the owner watches
    pub fn new() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Report the link as lost. Returns true if this was the first report.
    pub fn report(&self, cause: impl Into<String>) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                // The watcher may already be gone during shutdown
                let _ = tx.send(cause.into());
                true
            }
            None => false,
        }
    }

    /// Disarm the reporter for an intentional close
    pub fn silence(&self) {
        self.slot.lock().take();
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl std::fmt::Debug for LinkReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkReporter")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Where a transport delivers received lines and link loss
#[derive(Debug, Clone)]
pub struct LinkSink {
    pub inbound: mpsc::Sender<String>,
    pub reporter: LinkReporter,
}

/// Fire-and-forget writer handle for an open connection
#[derive(Debug, Clone)]
pub struct LineWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl LineWriter {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Queue raw text for the wire. Returns false once the link is gone.
    pub fn write(&self, data: impl Into<String>) -> bool {
        self.tx.send(data.into()).is_ok()
    }
}

/// An open transport connection, exclusively owned by one device
pub struct Connection {
    description: String,
    writer: LineWriter,
    reporter: LinkReporter,
    closing: Arc<AtomicBool>,
    tasks: Vec<AbortHandle>,
}

impl Connection {
    pub fn new(description: impl Into<String>, writer: LineWriter, reporter: LinkReporter) -> Self {
        Self {
            description: description.into(),
            writer,
            reporter,
            closing: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    /// Share a flag that blocking I/O threads poll to stop on close
    pub fn with_closing_flag(mut self, closing: Arc<AtomicBool>) -> Self {
        self.closing = closing;
        self
    }

    /// Attach a task to be aborted on close
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Close the link without reporting it as lost
    pub fn close(&mut self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reporter.silence();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::debug!("Closed {}", self.description);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("description", &self.description)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens transport connections from port specifications
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open `port`, delivering received lines and link loss to `sink`
    async fn open(&self, port: &str, sink: LinkSink) -> Result<Connection, ConnectionError>;
}

/// Connector dispatching on the port specification's scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct PortConnector;

#[async_trait]
impl Connector for PortConnector {
    async fn open(&self, port: &str, sink: LinkSink) -> Result<Connection, ConnectionError> {
        let spec = PortSpec::parse(port)?;
        match spec.scheme {
            Scheme::Dummy => Ok(dummy::open(&spec, sink)),
            Scheme::Serial => serial::open(&spec, sink).await,
            Scheme::Tcp => tcp::open(&spec, sink).await,
        }
    }
}
