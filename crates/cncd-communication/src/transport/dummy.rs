//! In-process dummy device
//!
//! Greets with a `start` banner, then answers every written line with `ok`
//! after a short fixed delay. It never drops the link on its own.

use std::time::Duration;
use tokio::sync::mpsc;

use super::{Connection, LineWriter, LinkSink, PortSpec};

/// Delay before the dummy acknowledges a line
pub const ACK_DELAY: Duration = Duration::from_millis(20);

pub fn open(spec: &PortSpec, sink: LinkSink) -> Connection {
    let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    let inbound = sink.inbound;
    let description = format!("dummy device {}", spec.address);

    let task = tokio::spawn(async move {
        if inbound.send("start".to_string()).await.is_err() {
            return;
        }
        while let Some(data) = outgoing.recv().await {
            // One acknowledgement per complete line
            for _ in data.matches('\n') {
                tokio::time::sleep(ACK_DELAY).await;
                if inbound.send("ok".to_string()).await.is_err() {
                    return;
                }
            }
        }
    });

    tracing::info!("Opened {}", description);
    Connection::new(description, LineWriter::new(tx), sink.reporter).with_task(task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkReporter;

    #[tokio::test]
    async fn test_dummy_banner_and_acks() {
        let (reporter, _rx) = LinkReporter::new();
        let (inbound, mut lines) = mpsc::channel(8);
        let spec = PortSpec::parse("dummy://printer@0").unwrap();
        let conn = open(&spec, LinkSink { inbound, reporter });

        assert_eq!(lines.recv().await.unwrap(), "start");
        assert!(conn.writer().write("G28\n"));
        assert_eq!(lines.recv().await.unwrap(), "ok");
        assert!(conn.writer().write("G1 X1\nG1 X2\n"));
        assert_eq!(lines.recv().await.unwrap(), "ok");
        assert_eq!(lines.recv().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_dummy_stops_on_close() {
        let (reporter, _rx) = LinkReporter::new();
        let (inbound, mut lines) = mpsc::channel(8);
        let spec = PortSpec::parse("dummy://printer@0").unwrap();
        let mut conn = open(&spec, LinkSink { inbound, reporter });
        assert_eq!(lines.recv().await.unwrap(), "start");

        conn.close();
        assert!(lines.recv().await.is_none());
    }
}
