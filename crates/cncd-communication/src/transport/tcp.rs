//! TCP console transport

use cncd_core::ConnectionError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{Connection, LineFramer, LineWriter, LinkSink, PortSpec};

pub async fn open(spec: &PortSpec, sink: LinkSink) -> Result<Connection, ConnectionError> {
    let endpoint = spec.endpoint();
    let stream = match TcpStream::connect(endpoint.as_str()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {}", endpoint, e);
            return Err(ConnectionError::from_io(&endpoint, &e));
        }
    };
    // Lines are small and latency bound
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let read_task = tokio::spawn({
        let sink = sink.clone();
        let endpoint = endpoint.clone();
        async move {
            let mut framer = LineFramer::new();
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        sink.reporter.report(format!("{}: connection closed by peer", endpoint));
                        return;
                    }
                    Ok(n) => {
                        for line in framer.push(&buf[..n]) {
                            if sink.inbound.send(line).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Read from {} failed: {}", endpoint, e);
                        sink.reporter.report(format!("{}: {}", endpoint, e));
                        return;
                    }
                }
            }
        }
    });

    let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    let write_task = tokio::spawn({
        let reporter = sink.reporter.clone();
        let endpoint = endpoint.clone();
        async move {
            while let Some(data) = outgoing.recv().await {
                if let Err(e) = writer.write_all(data.as_bytes()).await {
                    tracing::error!("Write to {} failed: {}", endpoint, e);
                    reporter.report(format!("{}: {}", endpoint, e));
                    return;
                }
            }
        }
    });

    tracing::info!("Connected to {}", endpoint);
    Ok(
        Connection::new(format!("tcp {}", endpoint), LineWriter::new(tx), sink.reporter)
            .with_task(read_task.abort_handle())
            .with_task(write_task.abort_handle()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkReporter;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_lines_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (reporter, lost) = LinkReporter::new();
        let (inbound, mut lines) = mpsc::channel(8);
        let spec = PortSpec::parse(&format!("tcp://127.0.0.1:{}", port)).unwrap();
        let conn = open(&spec, LinkSink { inbound, reporter }).await.unwrap();

        let (peer, _) = listener.accept().await.unwrap();
        let (peer_rx, mut peer_tx) = peer.into_split();
        peer_tx.write_all(b"Smoothie\r\n> ok\n").await.unwrap();
        assert_eq!(lines.recv().await.unwrap(), "Smoothie");
        assert_eq!(lines.recv().await.unwrap(), "> ok");

        assert!(conn.writer().write("G28\n"));
        let mut peer_lines = BufReader::new(peer_rx).lines();
        assert_eq!(peer_lines.next_line().await.unwrap().unwrap(), "G28");

        drop(peer_tx);
        drop(peer_lines);
        assert!(lost.await.unwrap().contains("closed by peer"));
    }

    #[tokio::test]
    async fn test_refused() {
        // Bind then drop to find a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (reporter, _lost) = LinkReporter::new();
        let (inbound, _lines) = mpsc::channel(1);
        let spec = PortSpec::parse(&format!("tcp://127.0.0.1:{}", port)).unwrap();
        let result = open(&spec, LinkSink { inbound, reporter }).await;
        assert!(matches!(result, Err(ConnectionError::Refused { .. })));
    }
}
