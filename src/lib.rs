//! # Ringodis - A Redis-compatible In-Memory Key-Value Server
//!
//! Ringodis speaks RESP over TCP, stores keys in sharded concurrent maps
//! spread over multiple logical databases, expires keys through a hashed
//! time wheel, and optionally forms a cluster that routes commands to peer
//! nodes by consistent hashing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Ringodis                                │
//! │                                                                      │
//! │  ┌──────────┐   ┌────────────┐   ┌───────────────────────────────┐   │
//! │  │ TCP      │──>│ Connection │──>│ Engine (standalone | cluster) │   │
//! │  │ accept   │   │ handler    │   └──────────────┬────────────────┘   │
//! │  └──────────┘   └────────────┘                  │                    │
//! │        ▲              │              ┌──────────┴──────────┐         │
//! │        │              ▼              ▼                     ▼         │
//! │  ┌──────────┐   ┌────────────┐  ┌──────────┐      ┌──────────────┐   │
//! │  │ RESP     │   │ RESP       │  │ KeySpace │      │ Cluster      │   │
//! │  │ encoder  │   │ parser     │  │ 0..N-1   │      │ ring + relay │   │
//! │  └──────────┘   └────────────┘  └────┬─────┘      └──────┬───────┘   │
//! │                                      │                   │           │
//! │                      ┌───────────────┼─────────┐   ┌─────┴───────┐   │
//! │                      ▼               ▼         ▼   ▼             │   │
//! │               ┌────────────┐  ┌───────────┐  ┌───────────────┐   │   │
//! │               │ Sharded    │  │ Striped   │  │ Peer client   │   │   │
//! │               │ dict + ttl │  │ RW locks  │  │ pools         │   │   │
//! │               └────────────┘  └───────────┘  └───────────────┘   │   │
//! │                      ▲                                           │   │
//! │               ┌──────┴──────┐                                    │   │
//! │               │ Time wheel  │<───────────────────────────────────┘   │
//! │               └─────────────┘                                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `GET`, `SET [EX seconds]`, `SETNX`, `SETEX`, `GETSET`, `STRLEN`
//! - Keys: `DEL`, `EXISTS`, `TYPE`, `RENAME`, `RENAMENX`, `KEYS`, `EXPIRE`,
//!   `TTL`, `PERSIST`, `FLUSHDB`
//! - Server: `PING`, `SELECT`
//!
//! In cluster mode, `EXPIRE TTL EXISTS TYPE SET SETNX SETEX GET` route to
//! the peer owning the key; `{...}` hash tags pin related keys to one peer.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP parser and reply encoder
//! - [`storage`]: sharded dict, striped locks, time wheel, sorted set
//! - [`db`]: data entities, per-database key spaces, multi-DB server
//! - [`commands`]: command registry and executors
//! - [`connection`]: per-client state and the read loop
//! - [`cluster`]: consistent-hash ring, peer clients and pools, relay
//! - [`config`]: `ringodis.conf` properties

pub mod cluster;
pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use cluster::Cluster;
pub use config::Properties;
pub use connection::{Connection, Handler};
pub use db::{DataEntity, KeySpace, Server, StorageEngine};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{ConcurrentDict, LockMap, TimeWheel};

/// Version of the server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
