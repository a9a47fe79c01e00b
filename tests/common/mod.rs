//! Shared helpers for the TCP integration tests
#![allow(dead_code)] // each test binary uses a different subset

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use loghub::config::ServerConfig;
use loghub::server::Server;

/// A server running on ephemeral ports plus its stop switch.
pub struct TestServer {
    pub ingest_addr: SocketAddr,
    pub query_addr: SocketAddr,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TestServer {
    /// Bind on ephemeral ports and start serving in the background.
    pub async fn start(config: ServerConfig) -> Self {
        let server = Server::bind(config).await.expect("server must bind");
        let ingest_addr = server.ingest_addr();
        let query_addr = server.query_addr();
        let (stop, stop_rx) = watch::channel(false);
        let join = tokio::spawn(server.run(stop_rx));
        Self {
            ingest_addr,
            query_addr,
            stop,
            join,
        }
    }

    /// Flip the stop signal and wait for the clean shutdown to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        tokio::time::timeout(Duration::from_secs(10), self.join)
            .await
            .expect("server must shut down within the drain window")
            .expect("server task must not panic");
    }
}

/// Config bound to localhost ephemeral ports with a short idle deadline.
pub fn local_config() -> ServerConfig {
    ServerConfig {
        ingest_addr: "127.0.0.1:0".parse().expect("valid address"),
        query_addr: "127.0.0.1:0".parse().expect("valid address"),
        idle_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// A producer connection that has consumed the greeting banner.
pub struct Producer {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
    pub banner: String,
}

impl Producer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect producer");
        let (read_half, writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut banner = String::new();
        reader
            .read_line(&mut banner)
            .await
            .expect("read producer banner");
        Self {
            reader,
            writer,
            banner,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("send log line");
    }

    /// Close the write side, leaving the server to finish buffered lines.
    pub async fn finish(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Send lines over a fresh producer connection and close it.
pub async fn send_lines(addr: SocketAddr, lines: &[&str]) {
    let mut producer = Producer::connect(addr).await;
    for line in lines {
        producer.send_line(line).await;
    }
    producer.finish().await;
    // Let the server drain the connection before callers query.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Issue one command on a fresh query connection, returning everything
/// the server wrote after its two banner lines.
pub async fn query_command(addr: SocketAddr, command: &str) -> String {
    let stream = TcpStream::connect(addr).await.expect("connect query");
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut banner = String::new();
    reader.read_line(&mut banner).await.expect("banner line 1");
    banner.clear();
    reader.read_line(&mut banner).await.expect("banner line 2");

    writer
        .write_all(format!("{}\n", command).as_bytes())
        .await
        .expect("send command");
    writer.shutdown().await.expect("half-close query");

    let mut response = String::new();
    reader
        .read_to_string(&mut response)
        .await
        .expect("read response");
    response
}

/// Poll a condition built from a STATS response until it holds or the
/// deadline passes.
pub async fn wait_for_stats(
    addr: SocketAddr,
    condition: impl Fn(&str) -> bool,
) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = query_command(addr, "STATS").await;
        if condition(&stats) {
            return stats;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("stats condition never held; last response: {stats:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
