//! Serial port transport
//!
//! Opens the port with the `serialport` crate and runs two blocking
//! threads: a reader framing incoming bytes into lines, and a writer
//! draining the outgoing channel. Read and write failures other than a
//! timeout are reported as loss of link.

use cncd_core::ConnectionError;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Connection, LineFramer, LineWriter, LinkReporter, LinkSink, PortSpec};

/// Short timeout so the reader notices a close promptly
const READ_TIMEOUT: Duration = Duration::from_millis(10);

fn map_open_error(port: &str, err: serialport::Error) -> ConnectionError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => ConnectionError::NotFound {
            port: port.to_string(),
        },
        serialport::ErrorKind::Io(kind) => {
            ConnectionError::from_io(port, &io::Error::new(kind, err.description))
        }
        _ => ConnectionError::Io {
            port: port.to_string(),
            reason: err.to_string(),
        },
    }
}

pub async fn open(spec: &PortSpec, sink: LinkSink) -> Result<Connection, ConnectionError> {
    let path = spec.address.clone();
    let baud = spec.parameter;

    let opened = tokio::task::spawn_blocking({
        let path = path.clone();
        move || -> Result<(Box<dyn SerialPort>, Box<dyn SerialPort>), ConnectionError> {
            let port = serialport::new(&path, baud)
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| map_open_error(&path, e))?;
            let writer = port
                .try_clone()
                .map_err(|e| map_open_error(&path, e))?;
            Ok((port, writer))
        }
    })
    .await
    .map_err(|e| ConnectionError::Io {
        port: path.clone(),
        reason: e.to_string(),
    })?;

    let (reader_port, writer_port) = match opened {
        Ok(ports) => ports,
        Err(e) => {
            tracing::warn!("Failed to open serial port {}: {}", path, e);
            return Err(e);
        }
    };

    let closing = Arc::new(AtomicBool::new(false));
    let (tx, outgoing) = mpsc::unbounded_channel::<String>();

    std::thread::Builder::new()
        .name(format!("serial-rx {}", path))
        .spawn({
            let closing = closing.clone();
            let sink = sink.clone();
            let path = path.clone();
            move || read_loop(reader_port, &path, sink, &closing)
        })
        .map_err(|e| ConnectionError::from_io(&path, &e))?;

    std::thread::Builder::new()
        .name(format!("serial-tx {}", path))
        .spawn({
            let closing = closing.clone();
            let reporter = sink.reporter.clone();
            let path = path.clone();
            move || write_loop(writer_port, &path, outgoing, reporter, &closing)
        })
        .map_err(|e| ConnectionError::from_io(&path, &e))?;

    tracing::info!("Serial port {} opened at {} baud", path, baud);
    Ok(
        Connection::new(format!("serial port {}", path), LineWriter::new(tx), sink.reporter)
            .with_closing_flag(closing),
    )
}

fn read_loop(mut port: Box<dyn SerialPort>, path: &str, sink: LinkSink, closing: &AtomicBool) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 512];

    while !closing.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => {
                sink.reporter.report(format!("{}: end of stream", path));
                return;
            }
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    if sink.inbound.blocking_send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !closing.load(Ordering::Acquire) {
                    tracing::error!("Serial device {} vanished: {}", path, e);
                    sink.reporter.report(format!("{}: {}", path, e));
                }
                return;
            }
        }
    }
}

fn write_loop(
    mut port: Box<dyn SerialPort>,
    path: &str,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    reporter: LinkReporter,
    closing: &AtomicBool,
) {
    while let Some(data) = outgoing.blocking_recv() {
        if closing.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = port.write_all(data.as_bytes()).and_then(|_| port.flush()) {
            tracing::error!("Write to {} failed: {}", path, e);
            reporter.report(format!("{}: {}", path, e));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_mapping() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert_eq!(
            map_open_error("/dev/ttyUSB7", err),
            ConnectionError::NotFound {
                port: "/dev/ttyUSB7".to_string()
            }
        );

        let err = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "denied",
        );
        assert!(matches!(
            map_open_error("/dev/ttyS0", err),
            ConnectionError::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_port_fails() {
        let (reporter, _rx) = LinkReporter::new();
        let (inbound, _lines) = mpsc::channel(1);
        let spec = PortSpec::parse("serial:///dev/cncd-does-not-exist@115200").unwrap();
        let result = open(&spec, LinkSink { inbound, reporter }).await;
        assert!(result.is_err());
    }
}
