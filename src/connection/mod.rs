//! Per-client connection state.

pub mod handler;

pub use handler::{ConnectionError, Handler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// How long a closing connection waits for in-flight writes to drain.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// State carried by one client connection: the write side of the socket, the
/// selected database index, and a counter gating graceful shutdown while a
/// response is mid-write.
///
/// The write half sits behind an async mutex so that replies are serialized
/// even when several tasks write to the same client.
pub struct Connection {
    peer_addr: SocketAddr,
    writer: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    selected_db: AtomicUsize,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Connection {
    pub fn new(write_half: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            writer: Mutex::new(Some(BufWriter::new(write_half))),
            selected_db: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// A connection without a transport, as used by the cluster's local
    /// relay tests and the database tests. Writes are discarded.
    pub fn detached() -> Self {
        Self {
            peer_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            writer: Mutex::new(None),
            selected_db: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The database index this connection currently operates on.
    pub fn selected_db(&self) -> usize {
        self.selected_db.load(Ordering::Acquire)
    }

    pub fn select_db(&self, index: usize) {
        self.selected_db.store(index, Ordering::Release);
    }

    /// Sends one serialized reply, flushing it through.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                None => Ok(()),
                Some(writer) => {
                    writer.write_all(bytes).await?;
                    writer.flush().await
                }
            }
        };
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
        result
    }

    /// Closes the write side, waiting up to ten seconds for in-flight
    /// responses to finish first.
    pub async fn close(&self) {
        let deadline = Instant::now() + CLOSE_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            let notified = self.drained.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let mut writer = self.writer.lock().await;
        if let Some(mut writer) = writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}
