//! TCP client for the lock protocol.

use std::time::Duration;

use bytes::BytesMut;
use locksmith_api::{Command, LineCodec, ProtocolError, Reply};
use locksmith_core::LockMode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub address: String,
    pub connect_timeout: Duration,
    /// Upper bound on sending a request and reading its reply
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }
}

/// One open connection with its framing state.
struct Connection {
    stream: TcpStream,
    codec: LineCodec,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl Connection {
    async fn open(config: &ClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.address.as_str()),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true)?;

        debug!(address = %config.address, "Connected to lock server");
        Ok(Self {
            stream,
            codec: LineCodec::new(),
            inbound: BytesMut::with_capacity(64),
            outbound: BytesMut::with_capacity(128),
        })
    }

    async fn call(&mut self, command: &Command) -> Result<Reply> {
        self.codec.encode(command, &mut self.outbound);
        self.stream.write_all_buf(&mut self.outbound).await?;
        self.stream.flush().await?;

        loop {
            if let Some(line) = self.codec.decode(&mut self.inbound)? {
                return parse_reply(&line);
            }
            if self.stream.read_buf(&mut self.inbound).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

fn parse_reply(line: &str) -> Result<Reply> {
    Reply::parse(line).map_err(|e| match e {
        ProtocolError::UnknownReply(text) => ClientError::UnexpectedReply(text),
        other => ClientError::Protocol(other),
    })
}

/// Lock client that reuses a single connection across requests.
///
/// The connection is opened on first use and dropped after any transport
/// error or timeout; the next request reconnects.
pub struct LockClient {
    config: ClientConfig,
    connection: Mutex<Option<Connection>>,
}

impl LockClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask for `name` in `mode` on behalf of `client`.
    ///
    /// `Reply::Failure` means the lock is held in a conflicting mode; the
    /// server never queues the request.
    pub async fn request_lock(&self, name: &str, client: &str, mode: LockMode) -> Result<Reply> {
        self.send(&Command::lock(name, client, mode)?).await
    }

    /// Give up `client`'s hold on `name`.
    pub async fn release_lock(&self, name: &str, client: &str) -> Result<Reply> {
        self.send(&Command::unlock(name, client)?).await
    }

    /// Send any command and wait for its reply.
    pub async fn send(&self, command: &Command) -> Result<Reply> {
        let mut guard = self.connection.lock().await;

        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => Connection::open(&self.config).await?,
        };

        let result = match tokio::time::timeout(self.config.request_timeout, connection.call(command))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };

        match &result {
            Ok(_) => *guard = Some(connection),
            Err(e) => {
                warn!(command = %command, error = %e, "Lock request failed, dropping connection");
            }
        }
        result
    }

    /// Close the current connection, if any.
    pub async fn disconnect(&self) {
        self.connection.lock().await.take();
    }
}

/// Ask for a lock over a fresh connection that is closed afterwards.
pub async fn request_lock(addr: &str, name: &str, client: &str, mode: LockMode) -> Result<Reply> {
    LockClient::new(ClientConfig::new(addr))
        .request_lock(name, client, mode)
        .await
}

/// Release a lock over a fresh connection that is closed afterwards.
pub async fn release_lock(addr: &str, name: &str, client: &str) -> Result<Reply> {
    LockClient::new(ClientConfig::new(addr))
        .release_lock(name, client)
        .await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("SUCCESS").unwrap(), Reply::Success);
        assert!(matches!(
            parse_reply("MAYBE"),
            Err(ClientError::UnexpectedReply(text)) if text == "MAYBE"
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("10.0.0.1:9000");
        assert_eq!(config.address, "10.0.0.1:9000");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_sending() {
        let client = LockClient::new(ClientConfig::new("127.0.0.1:1"));
        let err = client
            .request_lock("two words", "c1", LockMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::InvalidToken { .. })));
    }

    #[tokio::test]
    async fn test_reconnects_after_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // first connection: answer once then hang up, second: answer forever
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap();
            write_half.write_all(b"SUCCESS\n").await.unwrap();
            drop(lines);
            drop(write_half);

            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                write_half.write_all(b"FAILURE\n").await.unwrap();
            }
        });

        let client = LockClient::new(ClientConfig::new(addr));
        assert_eq!(
            client.request_lock("r1", "c1", LockMode::Write).await.unwrap(),
            Reply::Success
        );

        // the dead connection surfaces once, then the client reconnects
        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.push(client.release_lock("r1", "c1").await);
        }
        assert!(replies.iter().any(|r| matches!(r, Ok(Reply::Failure))));
        assert!(matches!(replies.last(), Some(Ok(Reply::Failure))));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            // accept and never answer
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = LockClient::new(ClientConfig {
            address: addr,
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let err = client
            .request_lock("r1", "c1", LockMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        server.abort();
    }
}
