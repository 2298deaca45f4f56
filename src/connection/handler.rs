//! Per-client read loop and connection lifecycle.
//!
//! Each accepted socket gets its own task running the read-parse-execute
//! loop. TCP is a byte stream: a single read may carry half a command or a
//! dozen pipelined ones, so incoming bytes accumulate in a `BytesMut` that
//! the parser is driven over until it runs dry.
//!
//! Error policy, by class:
//!
//! - *framing errors*: reply `-protocol error: ...`, drop the buffered
//!   bytes to resynchronize, keep the connection;
//! - *non-multi-bulk requests*: logged and dropped silently;
//! - *I/O errors*: close the connection.

use crate::connection::Connection;
use crate::db::StorageEngine;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Hard cap on buffered inbound bytes: one maximal bulk plus framing room.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client closed the socket between commands.
    #[error("client disconnected")]
    Disconnected,

    /// The socket closed with a partial command still buffered.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Accept-side handler: owns the engine and tracks live connections so a
/// shutdown can drain them.
pub struct Handler {
    engine: Arc<dyn StorageEngine>,
    active: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
    closing: AtomicBool,
}

impl Handler {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        })
    }

    /// Serves one client socket to completion.
    pub async fn handle(self: Arc<Self>, stream: TcpStream) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        let peer_addr = stream
            .peer_addr()
            .unwrap_or_else(|_| std::net::SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection::new(write_half, peer_addr));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&conn));
        info!(client = %peer_addr, "client connected");

        match self.serve(read_half, &conn).await {
            Ok(()) | Err(ConnectionError::Disconnected) => {
                info!(client = %peer_addr, "connection closed")
            }
            Err(ConnectionError::Io(ref err))
                if err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %peer_addr, "connection reset by client")
            }
            Err(err) => warn!(client = %peer_addr, error = %err, "connection error"),
        }

        conn.close().await;
        self.engine.after_client_close(&conn);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    async fn serve(
        &self,
        mut read_half: OwnedReadHalf,
        conn: &Arc<Connection>,
    ) -> Result<(), ConnectionError> {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);

        loop {
            loop {
                match parser.parse(&buffer) {
                    Ok(Some((message, consumed))) => {
                        buffer.advance(consumed);
                        self.dispatch(conn, message).await?;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(client = %conn.peer_addr(), error = %err, "protocol error");
                        conn.write(&RespValue::error(err.to_string()).serialize())
                            .await?;
                        // Discarding the buffer resets framing at the next
                        // message the client sends.
                        buffer.clear();
                        break;
                    }
                }
            }

            if buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ConnectionError::BufferFull);
            }
            let n = read_half.read_buf(&mut buffer).await?;
            if n == 0 {
                return if buffer.is_empty() {
                    Err(ConnectionError::Disconnected)
                } else {
                    Err(ConnectionError::UnexpectedEof)
                };
            }
        }
    }

    async fn dispatch(
        &self,
        conn: &Arc<Connection>,
        message: RespValue,
    ) -> Result<(), ConnectionError> {
        let Some(cmdline) = message.into_command_line() else {
            // Only multi-bulk requests are executable.
            error!(client = %conn.peer_addr(), "dropping non multi-bulk request");
            return Ok(());
        };
        if cmdline.is_empty() {
            return Ok(());
        }

        let reply = self.engine.exec(conn, &cmdline).await;
        conn.write(&reply.serialize()).await?;
        Ok(())
    }

    /// Stops accepting work and closes every live connection, draining
    /// in-flight writes, then closes the engine.
    pub async fn shutdown(&self) {
        info!("handler shutting down");
        self.closing.store(true, Ordering::Release);

        let conns: Vec<Arc<Connection>> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, c)| c)
            .collect();
        for conn in conns {
            conn.close().await;
        }
        self.engine.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Server;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Handler::new(Arc::new(Server::new(16)));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(Arc::clone(&handler).handle(stream));
            }
        });
        addr
    }

    async fn roundtrip(stream: &mut tokio::net::TcpStream, request: &[u8]) -> Vec<u8> {
        stream.write_all(request).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        let reply = roundtrip(&mut client, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n").await;
        assert_eq!(reply, b"+OK\r\n");
        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;
        assert_eq!(reply, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_set_with_ex_reports_ttl() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        let reply = roundtrip(
            &mut client,
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$3\r\n100\r\n",
        )
        .await;
        assert_eq!(reply, b"+OK\r\n");

        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nTTL\r\n$1\r\nk\r\n").await;
        let text = String::from_utf8(reply).unwrap();
        let ttl: i64 = text
            .trim_start_matches(':')
            .trim_end()
            .parse()
            .expect("integer reply");
        assert!((99..=100).contains(&ttl), "ttl was {}", ttl);
    }

    #[tokio::test]
    async fn test_exists_counts_existing_only() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n").await;
        let reply = roundtrip(
            &mut client,
            b"*3\r\n$6\r\nEXISTS\r\n$1\r\nk\r\n$1\r\nm\r\n",
        )
        .await;
        assert_eq!(reply, b":1\r\n");
    }

    #[tokio::test]
    async fn test_rename_moves_value_and_ttl() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        roundtrip(
            &mut client,
            b"*5\r\n$3\r\nSET\r\n$3\r\nsrc\r\n$1\r\nv\r\n$2\r\nEX\r\n$3\r\n500\r\n",
        )
        .await;
        let reply = roundtrip(
            &mut client,
            b"*3\r\n$6\r\nRENAME\r\n$3\r\nsrc\r\n$3\r\ndst\r\n",
        )
        .await;
        assert_eq!(reply, b"+OK\r\n");

        let reply = roundtrip(&mut client, b"*2\r\n$6\r\nEXISTS\r\n$3\r\nsrc\r\n").await;
        assert_eq!(reply, b":0\r\n");
        let reply = roundtrip(&mut client, b"*2\r\n$6\r\nEXISTS\r\n$3\r\ndst\r\n").await;
        assert_eq!(reply, b":1\r\n");

        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nTTL\r\n$3\r\ndst\r\n").await;
        let text = String::from_utf8(reply).unwrap();
        let ttl: i64 = text.trim_start_matches(':').trim_end().parse().unwrap();
        assert!((499..=500).contains(&ttl), "ttl was {}", ttl);
    }

    #[tokio::test]
    async fn test_renamenx_with_existing_destination() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, b"*3\r\n$3\r\nSET\r\n$3\r\nsrc\r\n$1\r\nv\r\n").await;
        roundtrip(&mut client, b"*3\r\n$3\r\nSET\r\n$3\r\ndst\r\n$1\r\nw\r\n").await;
        let reply = roundtrip(
            &mut client,
            b"*3\r\n$8\r\nRENAMENX\r\n$3\r\nsrc\r\n$3\r\ndst\r\n",
        )
        .await;
        assert_eq!(reply, b":0\r\n");
        // Source untouched.
        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nsrc\r\n").await;
        assert_eq!(reply, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_select_isolates_databases() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n").await;
        let reply = roundtrip(&mut client, b"*2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n").await;
        assert_eq!(reply, b"+OK\r\n");
        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;
        assert_eq!(reply, b"$-1\r\n");

        let reply = roundtrip(&mut client, b"*2\r\n$6\r\nSELECT\r\n$2\r\n99\r\n").await;
        assert_eq!(reply, b"-ERR DB index is out of range\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        let expected: &[u8] = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        let mut collected = Vec::new();
        let mut buf = vec![0u8; 1024];
        while collected.len() < expected.len() {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed early");
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, expected);
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_connection_open() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        let reply = roundtrip(&mut client, b"@bogus\r\n").await;
        assert!(reply.starts_with(b"-protocol error: "), "got {:?}", reply);

        // The same connection still serves well-formed commands.
        let reply = roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let reply = roundtrip(&mut client, b"*1\r\n$4\r\nQUUX\r\n").await;
        assert_eq!(reply, b"-ERR unknown command 'quux'\r\n");
    }

    #[tokio::test]
    async fn test_del_on_absent_keys_returns_zero() {
        let addr = spawn_server().await;
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let reply = roundtrip(&mut client, b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n").await;
        assert_eq!(reply, b":0\r\n");
    }
}
