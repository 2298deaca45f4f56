//! Pipelined RESP client for peer-to-peer command relay.
//!
//! One client owns one TCP connection and multiplexes many in-flight
//! requests over it. Two tasks cooperate through two bounded queues:
//!
//! - the *writer* drains `pending`, serializes each request onto the socket
//!   (retrying transient timeouts), and transfers it to `waiting`;
//! - the *reader* parses inbound replies and completes the head of
//!   `waiting` with each one.
//!
//! The transfer order is the write order, so FIFO pairing of replies to
//! requests holds as long as the peer answers in order, which RESP
//! guarantees per connection.
//!
//! When the reader hits an I/O error while the client is not closed, it
//! fails all outstanding requests with `connection closed`, redials up to
//! three times a second apart, and resumes. If redialing fails the client
//! transitions to closed and every later `send` is refused.

use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};

/// Capacity of the pending and waiting queues.
const CHAN_SIZE: usize = 256;

/// How long `send` waits for its reply.
const MAX_WAIT: Duration = Duration::from_secs(3);

/// Socket write attempts before a request is failed.
const WRITE_ATTEMPTS: usize = 3;

/// Redial attempts after a read-side failure.
const RECONNECT_ATTEMPTS: usize = 3;

/// Pause between redial attempts.
const RECONNECT_GAP: Duration = Duration::from_secs(1);

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

struct Request {
    args: Vec<Bytes>,
    reply_tx: oneshot::Sender<Result<RespValue, String>>,
}

struct Shared {
    addr: String,
    status: AtomicU8,
    writer: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    /// Swapped out wholesale during reconnection.
    waiting_tx: StdMutex<mpsc::Sender<Request>>,
}

/// A pipelined client bound to one peer address.
pub struct PeerClient {
    shared: Arc<Shared>,
    pending_tx: mpsc::Sender<Request>,
}

impl PeerClient {
    /// Dials the peer and starts the writer and reader tasks.
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (pending_tx, pending_rx) = mpsc::channel(CHAN_SIZE);
        let (waiting_tx, waiting_rx) = mpsc::channel(CHAN_SIZE);

        let shared = Arc::new(Shared {
            addr: addr.to_string(),
            status: AtomicU8::new(CREATED),
            writer: Mutex::new(Some(BufWriter::new(write_half))),
            waiting_tx: StdMutex::new(waiting_tx),
        });

        tokio::spawn(write_loop(Arc::clone(&shared), pending_rx));
        tokio::spawn(read_supervisor(Arc::clone(&shared), read_half, waiting_rx));
        shared.status.store(RUNNING, Ordering::Release);

        Ok(Self { shared, pending_tx })
    }

    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.status.load(Ordering::Acquire) == RUNNING
    }

    /// Stops accepting requests. In-flight requests resolve or time out.
    pub fn close(&self) {
        self.shared.status.store(CLOSED, Ordering::Release);
    }

    /// Sends one command line and waits up to three seconds for its reply.
    /// Failures come back as error replies, never as panics.
    pub async fn send(&self, args: Vec<Bytes>) -> RespValue {
        if !self.is_running() {
            return RespValue::error("client closed");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.pending_tx.send(Request { args, reply_tx }).await.is_err() {
            return RespValue::error("client closed");
        }

        match tokio::time::timeout(MAX_WAIT, reply_rx).await {
            Err(_) => RespValue::error("server time out"),
            Ok(Err(_)) => RespValue::error("connection closed"),
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(detail))) => RespValue::error(detail),
        }
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(shared: Arc<Shared>, mut pending_rx: mpsc::Receiver<Request>) {
    while let Some(request) = pending_rx.recv().await {
        if request.args.is_empty() {
            continue;
        }
        let bytes = RespValue::from_args(request.args.iter().cloned()).serialize();
        match write_request(&shared, &bytes).await {
            Ok(()) => {
                let waiting_tx = shared
                    .waiting_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Err(rejected) = waiting_tx.send(request).await {
                    let _ = rejected
                        .0
                        .reply_tx
                        .send(Err("connection closed".to_string()));
                }
            }
            Err(err) => {
                let _ = request
                    .reply_tx
                    .send(Err(format!("request failed {}", err)));
            }
        }
    }
}

async fn write_request(shared: &Shared, bytes: &[u8]) -> std::io::Result<()> {
    let mut writer = shared.writer.lock().await;
    let Some(writer) = writer.as_mut() else {
        return Err(std::io::Error::new(ErrorKind::NotConnected, "connection closed"));
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            // Transient stalls are retried back to back; anything else fails
            // the request.
            Err(err)
                if attempt < WRITE_ATTEMPTS
                    && matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
            {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn read_supervisor(
    shared: Arc<Shared>,
    mut read_half: OwnedReadHalf,
    mut waiting_rx: mpsc::Receiver<Request>,
) {
    loop {
        read_until_error(&shared, &mut read_half, &mut waiting_rx).await;
        if shared.status.load(Ordering::Acquire) == CLOSED {
            return;
        }
        match reconnect(&shared, waiting_rx).await {
            Some((new_read_half, new_waiting_rx)) => {
                read_half = new_read_half;
                waiting_rx = new_waiting_rx;
            }
            None => return,
        }
    }
}

async fn read_until_error(
    shared: &Shared,
    read_half: &mut OwnedReadHalf,
    waiting_rx: &mut mpsc::Receiver<Request>,
) {
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        loop {
            match parser.parse(&buffer) {
                Ok(Some((reply, consumed))) => {
                    buffer.advance(consumed);
                    match waiting_rx.recv().await {
                        Some(request) => {
                            let _ = request.reply_tx.send(Ok(reply));
                        }
                        // Every sender is gone: the client was torn down.
                        None => return,
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(peer = %shared.addr, error = %err, "unparseable peer reply");
                    return;
                }
            }
        }
        match read_half.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                error!(peer = %shared.addr, error = %err, "peer read failed");
                return;
            }
        }
    }
}

/// Fails everything still waiting on the dead socket, then redials. Returns
/// the new read half and waiting queue, or `None` after marking the client
/// closed.
async fn reconnect(
    shared: &Arc<Shared>,
    mut old_waiting_rx: mpsc::Receiver<Request>,
) -> Option<(OwnedReadHalf, mpsc::Receiver<Request>)> {
    info!(peer = %shared.addr, "reconnecting");
    *shared.writer.lock().await = None;

    let (new_waiting_tx, new_waiting_rx) = mpsc::channel(CHAN_SIZE);
    let old_waiting_tx = {
        let mut waiting_tx = shared
            .waiting_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *waiting_tx, new_waiting_tx)
    };
    drop(old_waiting_tx);
    while let Some(request) = old_waiting_rx.recv().await {
        let _ = request.reply_tx.send(Err("connection closed".to_string()));
    }

    for attempt in 1..=RECONNECT_ATTEMPTS {
        match TcpStream::connect(&shared.addr).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                *shared.writer.lock().await = Some(BufWriter::new(write_half));
                return Some((read_half, new_waiting_rx));
            }
            Err(err) => {
                error!(peer = %shared.addr, attempt, error = %err, "reconnect failed");
                tokio::time::sleep(RECONNECT_GAP).await;
            }
        }
    }

    shared.status.store(CLOSED, Ordering::Release);
    None
}
