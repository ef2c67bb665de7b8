//! Per-connection request loop.
//!
//! Reads bytes as they arrive, cuts them into frames, and answers every frame
//! in order. Replies produced by one read are written back in a single batch.

use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use locksmith_api::LineCodec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::debug;

use crate::handler::RequestHandler;

const READ_BUFFER_SIZE: usize = 4096;

/// Serve requests from `stream` until the peer closes it or shutdown fires.
///
/// Locks held by the peer are left alone when the connection ends; only their
/// lease reclaims them.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    handler: RequestHandler,
    max_frame_length: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = LineCodec::with_max_length(max_frame_length);
    let mut inbound = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut outbound = BytesMut::new();
    let mut handled: u64 = 0;

    debug!(peer = %peer, "Connection opened");

    loop {
        let read = tokio::select! {
            result = stream.read_buf(&mut inbound) => result?,
            _ = shutdown.recv() => {
                debug!(peer = %peer, "Closing connection for shutdown");
                break;
            }
        };
        let eof = read == 0;

        loop {
            let frame = if eof {
                codec.decode_eof(&mut inbound)
            } else {
                codec.decode(&mut inbound)
            };
            let reply = match frame {
                Ok(Some(frame)) => handler.handle_frame(&frame),
                Ok(None) => break,
                Err(e) => handler.reject(&e),
            };
            codec.encode(&reply, &mut outbound);
            handled += 1;
        }

        if !outbound.is_empty() {
            stream.write_all_buf(&mut outbound).await?;
            stream.flush().await?;
        }

        if eof {
            break;
        }
    }

    debug!(peer = %peer, requests = handled, "Connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use locksmith_core::{LockState, LockTable};
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn spawn_connection(
        handler: RequestHandler,
        max_frame_length: usize,
    ) -> (
        tokio::io::DuplexStream,
        broadcast::Sender<()>,
        tokio::task::JoinHandle<io::Result<()>>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(serve_connection(
            server,
            peer(),
            handler,
            max_frame_length,
            rx,
        ));
        (client, tx, task)
    }

    fn handler() -> RequestHandler {
        RequestHandler::new(Arc::new(LockTable::new(Duration::from_secs(10))))
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let handler = handler();
        let (client, _tx, task) = spawn_connection(handler.clone(), 1024);
        let (read_half, mut write_half) = tokio::io::split(client);

        write_half
            .write_all(b"LOCK r1 c1 WRITE\nLOCK r1 c2 READ\nBOGUS\nUNLOCK r1 c1\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let mut replies = Vec::new();
        for _ in 0..4 {
            replies.push(lines.next_line().await.unwrap().unwrap());
        }
        assert_eq!(replies, vec!["SUCCESS", "FAILURE", "FAILURE", "SUCCESS"]);

        drop(write_half);
        drop(lines);
        task.await.unwrap().unwrap();
        assert_eq!(handler.table().state("r1"), Some(LockState::Free));
    }

    #[tokio::test]
    async fn test_oversized_frame_keeps_connection_usable() {
        let (client, _tx, task) = spawn_connection(handler(), 16);
        let (read_half, mut write_half) = tokio::io::split(client);

        let mut long = vec![b'x'; 64];
        long.push(b'\n');
        write_half.write_all(&long).await.unwrap();
        write_half.write_all(b"LOCK r1 c1 READ\n").await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "FAILURE");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "SUCCESS");

        drop(write_half);
        drop(lines);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unterminated_request_answered_at_eof() {
        let handler = handler();
        let (client, _tx, task) = spawn_connection(handler.clone(), 1024);
        let (read_half, mut write_half) = tokio::io::split(client);

        write_half.write_all(b"LOCK r1 c1 WRITE").await.unwrap();
        write_half.shutdown().await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "SUCCESS");
        task.await.unwrap().unwrap();
        assert_eq!(handler.table().state("r1"), Some(LockState::Write));
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let handler = handler();
        let (client, tx, task) = spawn_connection(handler.clone(), 1024);
        let (read_half, mut write_half) = tokio::io::split(client);

        write_half.write_all(b"LOCK r1 c1 WRITE\n").await.unwrap();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "SUCCESS");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // the lock outlives the connection
        assert_eq!(handler.table().state("r1"), Some(LockState::Write));
    }
}
