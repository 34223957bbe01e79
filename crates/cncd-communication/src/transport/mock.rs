//! Scriptable in-memory transport for testing.
//!
//! Every opened connection is handed to the test as a [`MockLink`], which
//! observes written data and injects received lines or link loss.

use async_trait::async_trait;
use cncd_core::ConnectionError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Connection, Connector, LineWriter, LinkReporter, LinkSink};

/// Test side of one mock connection
#[derive(Debug)]
pub struct MockLink {
    /// Port string the connection was opened with
    pub port: String,
    written: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::Sender<String>,
    reporter: LinkReporter,
}

impl MockLink {
    /// Next chunk the device wrote, waiting at most `within`
    pub async fn next_write(&mut self, within: Duration) -> Option<String> {
        tokio::time::timeout(within, self.written.recv())
            .await
            .ok()
            .flatten()
    }

    /// Whether nothing is written for `within`
    pub async fn stays_quiet(&mut self, within: Duration) -> bool {
        self.next_write(within).await.is_none()
    }

    /// Deliver a received line to the device
    pub async fn reply(&self, line: &str) -> bool {
        self.inbound.send(line.to_string()).await.is_ok()
    }

    /// Simulate an unsolicited loss of link
    pub fn drop_link(&self, cause: &str) -> bool {
        self.reporter.report(cause)
    }

    /// Whether the device side is still listening
    pub fn is_open(&self) -> bool {
        !self.inbound.is_closed()
    }
}

/// Connector producing [`MockLink`]s instead of real connections
pub struct MockConnector {
    links: mpsc::UnboundedSender<MockLink>,
    failure: Mutex<Option<ConnectionError>>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                failure: Mutex::new(None),
            },
            rx,
        )
    }

    /// Make every following `open` fail with `err`
    pub fn fail_with(&self, err: ConnectionError) {
        *self.failure.lock() = Some(err);
    }

    /// Let `open` succeed again
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, port: &str, sink: LinkSink) -> Result<Connection, ConnectionError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }

        let (tx, written) = mpsc::unbounded_channel();
        let link = MockLink {
            port: port.to_string(),
            written,
            inbound: sink.inbound,
            reporter: sink.reporter.clone(),
        };
        // The test may have dropped its receiver
        let _ = self.links.send(link);

        Ok(Connection::new(
            format!("mock {}", port),
            LineWriter::new(tx),
            sink.reporter,
        ))
    }
}
