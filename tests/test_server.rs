use cncd::{server, Device, DeviceConfig, Dispatcher, HookRegistry, MemoryStatusStore, PortConnector, ProgressObserver};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(2);

struct Daemon {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn daemon() -> Daemon {
    let status = Arc::new(MemoryStatusStore::default());
    let hooks = Arc::new(HookRegistry::new());
    let progress = Arc::new(ProgressObserver::new(status.clone()));
    let device = Device::new(
        DeviceConfig::new("i3", "dummy://i3@0"),
        Arc::new(PortConnector),
        hooks,
        status.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new([device], status, progress));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server::serve(listener, dispatcher, async {
        let _ = stopped.await;
    }));
    Daemon {
        addr,
        stop: Some(stop),
        task,
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut client = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        assert_eq!(client.line().await.as_deref(), Some(server::WELCOME));
        client
    }

    async fn send(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
    }

    async fn line(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .unwrap()
            .unwrap()
    }

    /// Send a request and collect its response up to the final status line
    async fn request(&mut self, request: &str) -> Vec<String> {
        self.send(format!("{}\n", request).as_bytes()).await;
        let mut response = Vec::new();
        while let Some(line) = self.line().await {
            let done = line.ends_with(" OK") || line.contains(" ERROR ");
            response.push(line);
            if done {
                break;
            }
        }
        response
    }
}

#[tokio::test]
async fn test_nonce_echoed_on_every_line() {
    let daemon = daemon().await;
    let mut client = Client::connect(daemon.addr).await;

    let response = client.request("42 devices").await;
    assert_eq!(
        response,
        vec![
            "42 i3 disconnected dummy://i3@0 generic".to_string(),
            "42 OK".to_string(),
        ]
    );

    let response = client.request("7 connect i3").await;
    assert_eq!(response, vec!["7 OK".to_string()]);

    let response = client.request("8 connect i3").await;
    assert_eq!(response, vec!["8 ERROR Device i3 already connected".to_string()]);
}

#[tokio::test]
async fn test_sequence_used_without_nonce() {
    let daemon = daemon().await;
    let mut client = Client::connect(daemon.addr).await;

    assert_eq!(client.request("help stop").await, vec![
        "1 usage: stop <handle>".to_string(),
        "1 OK".to_string(),
    ]);
    assert_eq!(client.request("bogus").await, vec![
        "2 ERROR Unknown command 'bogus'".to_string(),
    ]);
}

#[tokio::test]
async fn test_quit_and_eot_close_connection() {
    let daemon = daemon().await;

    let mut client = Client::connect(daemon.addr).await;
    client.send(b"quit\n").await;
    assert_eq!(client.line().await.as_deref(), Some("1 closing for you"));
    assert_eq!(client.line().await, None);

    let mut client = Client::connect(daemon.addr).await;
    client.send(&[0x04]).await;
    assert_eq!(client.line().await, None);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let mut daemon = daemon().await;
    let mut client = Client::connect(daemon.addr).await;

    daemon.stop.take().unwrap().send(()).unwrap();
    tokio::time::timeout(WAIT, &mut daemon.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Clients already connected keep being served
    assert_eq!(client.request("5 devices").await.last().map(String::as_str), Some("5 OK"));
}
