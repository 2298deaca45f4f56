//! A single logical database.
//!
//! Each key space owns two sharded maps (values and absolute expiry
//! instants), a striped lock pool for multi-key commands, and a handle to
//! the shared time wheel for active expiry.
//!
//! Expiry is enforced twice over:
//!
//! - *lazily*: any read that observes a past ttl removes the key and reports
//!   it absent;
//! - *actively*: `expire_at` schedules a wheel job (`"expire:" + key`) whose
//!   closure re-acquires the key's write lock and re-reads the ttl before
//!   deleting, so a `persist` or a later `expire` that won the race is
//!   respected.

use crate::commands::{command_table, validate_arity};
use crate::db::DataEntity;
use crate::protocol::RespValue;
use crate::storage::{ConcurrentDict, LockMap, TimeWheel, DEFAULT_LOCKER_SIZE};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::debug;

/// Shard count for the value map.
const DATA_DICT_SIZE: usize = 1 << 10;

/// Shard count for the ttl map.
const TTL_DICT_SIZE: usize = 1 << 10;

/// The wheel job id owning a key's expiration.
fn expire_task_key(key: &str) -> String {
    format!("expire:{}", key)
}

/// One logical database: data, expirations, and the lock pool serializing
/// multi-key mutations.
pub struct KeySpace {
    index: usize,
    data: ConcurrentDict<DataEntity>,
    ttl: ConcurrentDict<Instant>,
    locks: LockMap,
    wheel: Arc<TimeWheel>,
    self_ref: Weak<KeySpace>,
}

impl KeySpace {
    /// Creates the key space at position `index`, wired to the shared wheel.
    pub fn new(index: usize, wheel: Arc<TimeWheel>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            index,
            data: ConcurrentDict::new(DATA_DICT_SIZE),
            ttl: ConcurrentDict::new(TTL_DICT_SIZE),
            locks: LockMap::new(DEFAULT_LOCKER_SIZE),
            wheel,
            self_ref: self_ref.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Executes one command line against this database: registry lookup,
    /// arity check, key-range analysis, lock acquisition, execution.
    pub fn exec(&self, cmdline: &[Bytes]) -> RespValue {
        let Some(name_arg) = cmdline.first() else {
            return RespValue::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_arg).to_lowercase();

        let Some(cmd) = command_table().get(name.as_str()) else {
            return RespValue::error(format!("ERR unknown command '{}'", name));
        };
        if !validate_arity(cmd.arity, cmdline.len()) {
            return RespValue::arg_num_error(&name);
        }

        let (writer_keys, reader_keys) = (cmd.prepare)(&cmdline[1..]);
        let _guard = self.locks.rw_locks(&writer_keys, &reader_keys);
        (cmd.executor)(self, &cmdline[1..])
    }

    /* ---- data access ---- */

    /// Returns the entity bound to `key`, unless absent or expired. Observing
    /// a past ttl deletes the key.
    pub fn get_entity(&self, key: &str) -> Option<DataEntity> {
        let entity = self.data.get(key)?;
        if self.is_expired(key) {
            return None;
        }
        Some(entity)
    }

    /// Inserts or overwrites. Returns 1 on insert, 0 on overwrite.
    pub fn put_entity(&self, key: &str, entity: DataEntity) -> u32 {
        self.data.put(key.to_string(), entity)
    }

    /// Overwrites only an existing key. Returns 1 on overwrite, 0 otherwise.
    pub fn put_if_exists(&self, key: &str, entity: DataEntity) -> u32 {
        self.data.put_if_exists(key.to_string(), entity)
    }

    /// Inserts only a missing key. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: &str, entity: DataEntity) -> u32 {
        self.data.put_if_absent(key.to_string(), entity)
    }

    /// Removes `key` from data and ttl, cancelling any pending expiry job.
    pub fn remove(&self, key: &str) {
        self.data.remove(key);
        self.ttl.remove(key);
        self.wheel.cancel(&expire_task_key(key));
    }

    /// Removes the given keys; returns how many existed beforehand.
    pub fn removes(&self, keys: &[String]) -> usize {
        let mut deleted = 0;
        for key in keys {
            if self.is_expired(key) {
                continue;
            }
            if self.data.get(key).is_some() {
                self.remove(key);
                deleted += 1;
            }
        }
        deleted
    }

    /// Drops every key and pending expiry of this database.
    pub fn flush(&self) {
        self.ttl.for_each(|key, _| {
            self.wheel.cancel(&expire_task_key(key));
            true
        });
        self.data.clear();
        self.ttl.clear();
    }

    /// Visits every key in the data map (per-shard snapshot).
    pub fn for_each_key<F>(&self, mut consumer: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.data.for_each(|key, _| consumer(key));
    }

    /// Number of keys currently stored, expired entries included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /* ---- expiry ---- */

    /// Sets the key to expire at the absolute instant `at` and schedules the
    /// matching wheel job, replacing any previous one for the same key.
    pub fn expire_at(&self, key: &str, at: Instant) {
        self.ttl.put(key.to_string(), at);

        let weak = self.self_ref.clone();
        let owned = key.to_string();
        self.wheel.at(at, &expire_task_key(key), move || {
            let Some(db) = weak.upgrade() else {
                return;
            };
            debug!(key = %owned, "expiry job fired");
            let _guard = db.locks.lock_key(&owned);
            // The ttl may have been persisted or pushed out while this job
            // sat in its slot; re-read it under the key lock before deleting.
            match db.ttl.get(&owned) {
                Some(at) if at <= Instant::now() => db.remove(&owned),
                _ => {}
            }
        });
    }

    /// Clears the key's ttl and cancels its expiry job; the value remains.
    pub fn persist(&self, key: &str) {
        self.ttl.remove(key);
        self.wheel.cancel(&expire_task_key(key));
    }

    /// The absolute expiry instant recorded for `key`, if any.
    pub fn ttl_at(&self, key: &str) -> Option<Instant> {
        self.ttl.get(key)
    }

    /// True when the key's ttl has passed; a true result removes the key.
    pub fn is_expired(&self, key: &str) -> bool {
        match self.ttl.get(key) {
            Some(at) if at <= Instant::now() => {
                self.remove(key);
                true
            }
            _ => false,
        }
    }
}
