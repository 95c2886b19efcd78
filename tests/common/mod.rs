//! Test harness: boots a relay on an ephemeral port and drives it with
//! line-based TCP clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use chat_relay::registry::SessionRegistry;
use chat_relay::shutdown::ShutdownCoordinator;
use chat_relay::{RelayConfig, RelayServer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> RelayConfig {
    RelayConfig {
        bind_host: "127.0.0.1".into(),
        bind_port: 0,
        shutdown_grace_millis: 500,
        ..RelayConfig::default()
    }
}

/// A running relay. The server task is aborted on drop.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub shutdown: ShutdownCoordinator,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestRelay {
    pub async fn start(config: RelayConfig) -> Self {
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            registry,
            shutdown,
            handle: Some(handle),
        }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// Connect, log in, and wait until the session is registered.
    pub async fn login(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(&format!("LOGIN:{name}")).await;
        self.wait_until(|r| r.contains_username(name)).await;
        client
    }

    pub async fn wait_until<F>(&self, check: F)
    where
        F: Fn(&SessionRegistry) -> bool,
    {
        let deadline = Instant::now() + TIMEOUT;
        while !check(&self.registry) {
            assert!(Instant::now() < deadline, "registry condition not reached");
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Request shutdown and wait for the server task to finish.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.shutdown();
        let handle = self.handle.take().unwrap();
        timeout(TIMEOUT, handle).await.unwrap().unwrap()
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();

        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next line from the server; panics on EOF or timeout.
    pub async fn recv(&mut self) -> String {
        timeout(TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed")
    }

    /// Assert nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(line) = timeout(wait, self.lines.next_line()).await {
            panic!("expected silence, got {line:?}");
        }
    }

    /// Assert the server closes the connection, skipping any lines before it.
    pub async fn expect_closed(&mut self) {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.lines.next_line()).await {
                Err(_) => panic!("connection still open"),
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) | Ok(Err(_)) => return,
            }
        }
    }
}
