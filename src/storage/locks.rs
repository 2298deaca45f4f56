//! Striped reader-writer lock for multi-key commands.
//!
//! A fixed, power-of-two pool of RW mutexes indexed by key hash. Commands
//! that touch several keys acquire every involved slot in ascending index
//! order, which makes multi-key acquisition deadlock-free without per-key
//! lock allocation. The returned guard releases the slots in descending
//! order when dropped.

use crate::storage::fnv32;
use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default number of lock slots.
pub const DEFAULT_LOCKER_SIZE: usize = 1024;

enum SlotGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// RAII guard over a set of lock slots.
///
/// Slots were acquired in ascending index order; `Drop` releases them in
/// descending order.
pub struct KeyLockGuard<'a> {
    guards: Vec<SlotGuard<'a>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// A fixed pool of RW mutexes striped by key hash.
pub struct LockMap {
    slots: Vec<RwLock<()>>,
    mask: u32,
}

impl LockMap {
    /// Creates a pool of `size` slots, rounded up to a power of two.
    pub fn new(size: usize) -> Self {
        let count = size.max(1).next_power_of_two();
        Self {
            slots: (0..count).map(|_| RwLock::new(())).collect(),
            mask: (count - 1) as u32,
        }
    }

    #[inline]
    fn slot_index(&self, key: &str) -> u32 {
        fnv32(key.as_bytes()) & self.mask
    }

    /// Number of slots in the pool.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Takes the exclusive lock covering a single key.
    pub fn lock_key(&self, key: &str) -> RwLockWriteGuard<'_, ()> {
        self.slots[self.slot_index(key) as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the shared lock covering a single key.
    pub fn rlock_key(&self, key: &str) -> RwLockReadGuard<'_, ()> {
        self.slots[self.slot_index(key) as usize]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the locks covering `writer_keys` and `reader_keys` together.
    ///
    /// Duplicate keys are allowed; each touched slot is locked exactly once.
    /// A slot is taken in write mode iff some writer key hashes to it; the
    /// mode depends on set membership, never on argument order. Slots are
    /// acquired in ascending index order.
    pub fn rw_locks<'a, W, R>(&'a self, writer_keys: W, reader_keys: R) -> KeyLockGuard<'a>
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let writer_slots: HashSet<u32> = writer_keys
            .into_iter()
            .map(|k| self.slot_index(k.as_ref()))
            .collect();
        let mut all_slots: BTreeSet<u32> = writer_slots.iter().copied().collect();
        all_slots.extend(reader_keys.into_iter().map(|k| self.slot_index(k.as_ref())));

        let mut guards = Vec::with_capacity(all_slots.len());
        for index in all_slots {
            let slot = &self.slots[index as usize];
            if writer_slots.contains(&index) {
                guards.push(SlotGuard::Write(
                    slot.write().unwrap_or_else(PoisonError::into_inner),
                ));
            } else {
                guards.push(SlotGuard::Read(
                    slot.read().unwrap_or_else(PoisonError::into_inner),
                ));
            }
        }
        KeyLockGuard { guards }
    }
}

impl Default for LockMap {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn all_slots_free(locks: &LockMap) -> bool {
        locks.slots.iter().all(|slot| slot.try_write().is_ok())
    }

    #[test]
    fn test_size_rounding() {
        assert_eq!(LockMap::new(1000).size(), 1024);
        assert_eq!(LockMap::new(1024).size(), 1024);
        assert_eq!(LockMap::default().size(), DEFAULT_LOCKER_SIZE);
    }

    #[test]
    fn test_locks_released_on_drop() {
        let locks = LockMap::new(64);
        {
            let _guard = locks.rw_locks(vec!["a", "b"], vec!["c", "d"]);
        }
        assert!(all_slots_free(&locks));
    }

    #[test]
    fn test_duplicate_keys_lock_once() {
        let locks = LockMap::new(64);
        // The same key twice in the writer list must not self-deadlock.
        let guard = locks.rw_locks(vec!["k", "k", "k"], vec!["k"]);
        drop(guard);
        assert!(all_slots_free(&locks));
    }

    #[test]
    fn test_writer_membership_wins_over_position() {
        let locks = LockMap::new(64);
        // "k" appears in both lists; its slot must be write-locked.
        let _guard = locks.rw_locks(vec!["k"], vec!["k"]);
        let slot = &locks.slots[locks.slot_index("k") as usize];
        assert!(slot.try_read().is_err());
    }

    #[test]
    fn test_reader_slots_stay_shared() {
        let locks = LockMap::new(64);
        let _guard = locks.rw_locks(Vec::<String>::new(), vec!["r"]);
        let slot = &locks.slots[locks.slot_index("r") as usize];
        // Read mode admits concurrent readers but no writer.
        assert!(slot.try_read().is_ok());
        assert!(slot.try_write().is_err());
    }

    #[test]
    fn test_empty_key_sets() {
        let locks = LockMap::new(64);
        let guard = locks.rw_locks(Vec::<String>::new(), Vec::<String>::new());
        drop(guard);
        assert!(all_slots_free(&locks));
    }

    #[test]
    fn test_concurrent_multi_key_acquisition() {
        // Many threads locking overlapping key sets in different orders must
        // neither deadlock nor corrupt a shared counter.
        let locks = Arc::new(LockMap::new(16));
        let counter = Arc::new(std::sync::Mutex::new(0u64));
        let mut handles = vec![];
        for t in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let a = format!("key-{}", (t + i) % 5);
                    let b = format!("key-{}", (t * i) % 7);
                    let _guard = locks.rw_locks(vec![a, b], vec!["shared".to_string()]);
                    *counter.lock().unwrap() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 1600);
        assert!(all_slots_free(&locks));
    }

    #[test]
    fn test_single_key_guards() {
        let locks = LockMap::new(64);
        {
            let _w = locks.lock_key("k");
            assert!(locks.slots[locks.slot_index("k") as usize].try_read().is_err());
        }
        {
            let _r = locks.rlock_key("k");
            assert!(locks.slots[locks.slot_index("k") as usize].try_read().is_ok());
        }
        assert!(all_slots_free(&locks));
    }
}
