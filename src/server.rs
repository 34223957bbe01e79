//! Line-protocol command server
//!
//! Clients send one command per line, optionally prefixed with an integer
//! nonce. Every response line carries the nonce (or a per-client sequence
//! number when none was given) and the last one is `OK` or
//! `ERROR <reason>`:
//!
//! ```text
//! > 7 gcode i3 G28
//! < 7 OK
//! > devices
//! < 2 i3 idle serial:///dev/ttyUSB0@115200 marlin
//! < 2 OK
//! ```
//!
//! `quit` or Control-D closes the connection.

use cncd_communication::transport::LineFramer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::dispatcher::{split_args, Dispatcher};

/// End of transmission (Control-D)
const EOT: u8 = 0x04;

/// Greeting sent to every new client
pub const WELCOME: &str = ">>> welcome";

/// Format the response to one request
pub fn format_response(nonce: u64, result: &cncd_core::Result<Vec<String>>) -> String {
    let mut out = String::new();
    match result {
        Ok(lines) => {
            for line in lines {
                out.push_str(&format!("{} {}\n", nonce, line));
            }
            out.push_str(&format!("{} OK\n", nonce));
        }
        Err(e) => out.push_str(&format!("{} ERROR {}\n", nonce, e)),
    }
    out
}

/// Accept clients until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    tracing::info!("Serving on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Okay, shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tokio::spawn(handle_client(stream, peer, dispatcher.clone()));
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>) {
    tracing::info!("Connection from {}", peer);
    let (mut reader, mut writer) = stream.into_split();

    // Responses of concurrent requests are written whole, one at a time
    let (tx, mut responses) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            if writer.write_all(response.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    let _ = tx.send(format!("{}\n", WELCOME));

    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    let mut sequence = 0u64;

    'client: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", peer, e);
                break;
            }
        };
        let (data, eot) = match buf[..n].iter().position(|&b| b == EOT) {
            Some(idx) => (&buf[..idx], true),
            None => (&buf[..n], false),
        };

        for line in framer.push(data) {
            let mut argv = split_args(&line);
            if argv.is_empty() {
                continue;
            }
            sequence += 1;
            let nonce = match argv[0].parse::<u64>() {
                Ok(nonce) => {
                    argv.remove(0);
                    nonce
                }
                Err(_) => sequence,
            };

            if argv.first().map(String::as_str) == Some("quit") {
                let _ = tx.send(format!("{} closing for you\n", nonce));
                break 'client;
            }

            let dispatcher = dispatcher.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = dispatcher.dispatch(&argv).await;
                if let Err(e) = &result {
                    tracing::debug!("Command {:?} failed: {}", argv, e);
                }
                let _ = tx.send(format_response(nonce, &result));
            });
        }

        if eot {
            tracing::debug!("RX EOT from {}, closing", peer);
            break;
        }
    }

    drop(tx);
    // In-flight commands keep the writer open until they answer
    let _ = writer_task.await;
    tracing::debug!("Connection from {} closed", peer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_response() {
        let ok = Ok(vec!["i3 idle".to_string()]);
        assert_eq!(format_response(7, &ok), "7 i3 idle\n7 OK\n");

        let err = Err(cncd_core::Error::other("usage: stop <handle>"));
        assert_eq!(format_response(3, &err), "3 ERROR usage: stop <handle>\n");
    }
}
