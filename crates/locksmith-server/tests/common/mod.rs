//! Common test utilities for integration testing
//!
//! `TestServer` runs a real lock server on an ephemeral local port together
//! with its lease reaper, and stops both when dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use locksmith_core::LockTable;
use locksmith_server::{LockServer, ServerConfig, ShutdownSignal};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub table: Arc<LockTable>,
    shutdown: ShutdownSignal,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Duration::from_secs(10), 1024).await
    }

    pub async fn start_with(lease_timeout: Duration, max_frame_length: usize) -> Self {
        let config = ServerConfig {
            address: "127.0.0.1".to_string(),
            port: 0,
            lease_timeout,
            max_frame_length,
        };
        let table = Arc::new(LockTable::new(lease_timeout));
        let shutdown = ShutdownSignal::new();
        table.start_reaper(shutdown.subscribe());

        let server = LockServer::bind(&config, table.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        tokio::spawn(server.serve(shutdown.clone()));

        Self {
            addr,
            table,
            shutdown,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

/// Raw line-oriented connection for exercising the wire format directly.
#[allow(dead_code)]
pub struct RawConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

#[allow(dead_code)]
impl RawConnection {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write");
    }

    pub async fn read_reply(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("reply timeout")
            .expect("read")
    }

    pub async fn request(&mut self, line: &str) -> String {
        self.send_raw(format!("{line}\n").as_bytes()).await;
        self.read_reply().await.expect("connection closed")
    }
}

/// Generate a unique lock name to avoid conflicts between tests
#[allow(dead_code)]
pub fn unique_lock_name(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}_{}", prefix, timestamp)
}
