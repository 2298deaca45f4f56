//! Multi-database server and the engine seam.
//!
//! A standalone server is an ordered set of independent key spaces sharing
//! one time wheel. `SELECT` switches the connection's database index; every
//! other command runs against the currently selected key space.

use crate::connection::Connection;
use crate::db::KeySpace;
use crate::protocol::RespValue;
use crate::storage::TimeWheel;
use async_trait::async_trait;
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Default number of logical databases.
pub const DEFAULT_DATABASES: usize = 16;

/// The engine seam the TCP handler dispatches through, implemented by the
/// standalone [`Server`] and by the cluster router.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Executes one command line on behalf of `conn`.
    async fn exec(&self, conn: &Connection, cmdline: &[Bytes]) -> RespValue;

    /// Releases engine resources at shutdown.
    fn close(&self);

    /// Hook invoked after a client connection is torn down.
    fn after_client_close(&self, conn: &Connection);
}

/// A standalone multi-database server.
pub struct Server {
    dbs: Vec<Arc<KeySpace>>,
    wheel: Arc<TimeWheel>,
}

impl Server {
    /// Creates `databases` key spaces (default 16 when zero) over a fresh
    /// time wheel.
    pub fn new(databases: usize) -> Self {
        let databases = if databases == 0 {
            DEFAULT_DATABASES
        } else {
            databases
        };
        let wheel = TimeWheel::with_defaults();
        let dbs = (0..databases)
            .map(|index| KeySpace::new(index, Arc::clone(&wheel)))
            .collect();
        Self { dbs, wheel }
    }

    pub fn database_count(&self) -> usize {
        self.dbs.len()
    }

    /// Synchronous execution path, shared with the cluster router's local
    /// relay. Panics from executors are caught here and surface as
    /// `-Err unknown`; lock guards release on unwind, so none leak.
    pub fn exec_sync(&self, conn: &Connection, cmdline: &[Bytes]) -> RespValue {
        catch_unwind(AssertUnwindSafe(|| self.exec_inner(conn, cmdline))).unwrap_or_else(
            |panic| {
                warn!(detail = panic_message(&*panic), "executor panicked");
                RespValue::unknown_error()
            },
        )
    }

    fn exec_inner(&self, conn: &Connection, cmdline: &[Bytes]) -> RespValue {
        let Some(name_arg) = cmdline.first() else {
            return RespValue::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_arg).to_lowercase();

        if name == "select" {
            if cmdline.len() != 2 {
                return RespValue::arg_num_error("select");
            }
            return self.exec_select(conn, &cmdline[1]);
        }

        match self.dbs.get(conn.selected_db()) {
            None => RespValue::error("ERR DB index is out of range"),
            Some(db) => db.exec(cmdline),
        }
    }

    fn exec_select(&self, conn: &Connection, arg: &Bytes) -> RespValue {
        let index: usize = match std::str::from_utf8(arg).ok().and_then(|s| s.parse().ok()) {
            None => return RespValue::error("ERR invalid DB index"),
            Some(index) => index,
        };
        if index >= self.dbs.len() {
            return RespValue::error("ERR DB index is out of range");
        }
        conn.select_db(index);
        RespValue::ok()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

#[async_trait]
impl StorageEngine for Server {
    async fn exec(&self, conn: &Connection, cmdline: &[Bytes]) -> RespValue {
        self.exec_sync(conn, cmdline)
    }

    fn close(&self) {
        self.wheel.stop();
    }

    fn after_client_close(&self, _conn: &Connection) {}
}
