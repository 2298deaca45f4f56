//! Sharded concurrent map.
//!
//! A fixed array of shards, each owning an independent `HashMap` behind its
//! own `RwLock`. Keys are distributed by a 32-bit FNV-1a hash masked to the
//! shard count, so operations on different shards never contend.
//!
//! Iteration (`for_each`, `keys`) takes shard read locks one at a time: it
//! observes a consistent snapshot of each shard but not of the whole map.
//! That trade-off buys throughput and is fine for the commands built on it.

use crate::storage::fnv32;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Minimum shard count; requested counts are rounded up to a power of two.
const MIN_SHARDS: usize = 16;

struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// A thread-safe map sharded by key hash.
///
/// Single-key operations are linearizable with respect to their shard's lock.
/// The global length is tracked with a relaxed atomic counter.
pub struct ConcurrentDict<V> {
    shards: Vec<Shard<V>>,
    mask: u32,
    len: AtomicUsize,
}

/// Rounds `n` up to the next power of two, with a floor of [`MIN_SHARDS`].
fn shard_capacity(n: usize) -> usize {
    n.max(MIN_SHARDS).next_power_of_two()
}

impl<V: Clone> ConcurrentDict<V> {
    /// Creates a dict with `shard_count` shards (rounded up, min 16).
    pub fn new(shard_count: usize) -> Self {
        let count = shard_capacity(shard_count);
        let shards = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards,
            mask: (count - 1) as u32,
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard_of(&self, key: &str) -> &Shard<V> {
        &self.shards[(fnv32(key.as_bytes()) & self.mask) as usize]
    }

    /// Returns the number of shards (always a power of two).
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Looks up a key, cloning the value out of the shard.
    pub fn get(&self, key: &str) -> Option<V> {
        let map = read(&self.shard_of(key).map);
        map.get(key).cloned()
    }

    /// Inserts or overwrites. Returns 1 if the key was inserted, 0 if an
    /// existing value was replaced.
    pub fn put(&self, key: String, val: V) -> u32 {
        let mut map = write(&self.shard_of(&key).map);
        if map.insert(key, val).is_some() {
            0
        } else {
            self.len.fetch_add(1, Ordering::Relaxed);
            1
        }
    }

    /// Inserts only if the key is absent. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: String, val: V) -> u32 {
        let mut map = write(&self.shard_of(&key).map);
        if map.contains_key(&key) {
            0
        } else {
            map.insert(key, val);
            self.len.fetch_add(1, Ordering::Relaxed);
            1
        }
    }

    /// Overwrites only if the key exists. Returns 1 on overwrite, 0 otherwise.
    pub fn put_if_exists(&self, key: String, val: V) -> u32 {
        let mut map = write(&self.shard_of(&key).map);
        if map.contains_key(&key) {
            map.insert(key, val);
            1
        } else {
            0
        }
    }

    /// Removes a key. Returns 1 if it existed, 0 otherwise.
    pub fn remove(&self, key: &str) -> u32 {
        let mut map = write(&self.shard_of(key).map);
        if map.remove(key).is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    /// Approximate number of entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry, one shard at a time. The consumer returning
    /// `false` aborts the iteration.
    pub fn for_each<F>(&self, mut consumer: F)
    where
        F: FnMut(&str, &V) -> bool,
    {
        for shard in &self.shards {
            let map = read(&shard.map);
            for (key, val) in map.iter() {
                if !consumer(key, val) {
                    return;
                }
            }
        }
    }

    /// Collects every key.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.to_string());
            true
        });
        keys
    }

    /// Samples `limit` keys with replacement; the output length equals
    /// `limit` unless the dict holds fewer keys than requested, in which
    /// case every key is returned once.
    pub fn random_keys(&self, limit: usize) -> Vec<String> {
        let size = self.len();
        if size == 0 || limit == 0 {
            return Vec::new();
        }
        if limit >= size {
            return self.keys();
        }

        let mut rng = rand::thread_rng();
        let mut keys = Vec::with_capacity(limit);
        while keys.len() < limit {
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = random_key_in(shard, &mut rng) {
                keys.push(key);
            }
        }
        keys
    }

    /// Samples up to `limit` distinct keys.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<String> {
        let size = self.len();
        if size == 0 || limit == 0 {
            return Vec::new();
        }
        if limit >= size {
            return self.keys();
        }

        let mut rng = rand::thread_rng();
        let mut seen = std::collections::HashSet::with_capacity(limit);
        while seen.len() < limit {
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = random_key_in(shard, &mut rng) {
                seen.insert(key);
            }
        }
        seen.into_iter().collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = write(&shard.map);
            removed += map.len();
            map.clear();
        }
        self.len.fetch_sub(removed, Ordering::Relaxed);
    }
}

fn random_key_in<V>(shard: &Shard<V>, rng: &mut impl Rng) -> Option<String> {
    let map = read(&shard.map);
    if map.is_empty() {
        return None;
    }
    let nth = rng.gen_range(0..map.len());
    map.keys().nth(nth).cloned()
}

// A shard whose lock was poisoned by a recovered panic still holds valid
// data; keep serving it instead of propagating the poison.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(ConcurrentDict::<u32>::new(0).shard_count(), 16);
        assert_eq!(ConcurrentDict::<u32>::new(16).shard_count(), 16);
        assert_eq!(ConcurrentDict::<u32>::new(17).shard_count(), 32);
        assert_eq!(ConcurrentDict::<u32>::new(1000).shard_count(), 1024);
    }

    #[test]
    fn test_put_and_get() {
        let dict = ConcurrentDict::new(16);
        assert_eq!(dict.put("k".to_string(), 1), 1);
        assert_eq!(dict.get("k"), Some(1));
        assert_eq!(dict.put("k".to_string(), 2), 0);
        assert_eq!(dict.get("k"), Some(2));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get("missing"), None);
    }

    #[test]
    fn test_put_if_absent() {
        let dict = ConcurrentDict::new(16);
        assert_eq!(dict.put_if_absent("k".to_string(), 1), 1);
        assert_eq!(dict.put_if_absent("k".to_string(), 2), 0);
        assert_eq!(dict.get("k"), Some(1));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_put_if_exists() {
        let dict = ConcurrentDict::new(16);
        assert_eq!(dict.put_if_exists("k".to_string(), 1), 0);
        assert_eq!(dict.get("k"), None);
        dict.put("k".to_string(), 1);
        assert_eq!(dict.put_if_exists("k".to_string(), 2), 1);
        assert_eq!(dict.get("k"), Some(2));
    }

    #[test]
    fn test_remove() {
        let dict = ConcurrentDict::new(16);
        dict.put("k".to_string(), 1);
        assert_eq!(dict.remove("k"), 1);
        assert_eq!(dict.remove("k"), 0);
        assert_eq!(dict.get("k"), None);
        assert_eq!(dict.len(), 0);
    }

    #[test]
    fn test_for_each_abort() {
        let dict = ConcurrentDict::new(16);
        for i in 0..100 {
            dict.put(format!("k{}", i), i);
        }
        let mut visited = 0;
        dict.for_each(|_, _| {
            visited += 1;
            visited < 10
        });
        assert_eq!(visited, 10);
    }

    #[test]
    fn test_keys() {
        let dict = ConcurrentDict::new(16);
        for i in 0..50 {
            dict.put(format!("k{}", i), i);
        }
        let mut keys = dict.keys();
        keys.sort();
        assert_eq!(keys.len(), 50);
        assert!(keys.contains(&"k0".to_string()));
        assert!(keys.contains(&"k49".to_string()));
    }

    #[test]
    fn test_random_keys() {
        let dict = ConcurrentDict::new(16);
        assert!(dict.random_keys(5).is_empty());

        for i in 0..100 {
            dict.put(format!("k{}", i), i);
        }
        // Sampling is with replacement; the output length is exactly the limit.
        let sample = dict.random_keys(10);
        assert_eq!(sample.len(), 10);
        assert!(sample.iter().all(|k| dict.get(k).is_some()));

        // Asking for at least the full population returns each key once.
        assert_eq!(dict.random_keys(100).len(), 100);
        assert_eq!(dict.random_keys(500).len(), 100);
    }

    #[test]
    fn test_random_distinct_keys() {
        let dict = ConcurrentDict::new(16);
        for i in 0..100 {
            dict.put(format!("k{}", i), i);
        }
        let sample = dict.random_distinct_keys(10);
        assert_eq!(sample.len(), 10);
        let unique: std::collections::HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_clear() {
        let dict = ConcurrentDict::new(16);
        for i in 0..20 {
            dict.put(format!("k{}", i), i);
        }
        dict.clear();
        assert_eq!(dict.len(), 0);
        assert_eq!(dict.get("k0"), None);
    }

    #[test]
    fn test_concurrent_put_get() {
        let dict = Arc::new(ConcurrentDict::new(64));
        let mut handles = vec![];
        for t in 0..8 {
            let dict = Arc::clone(&dict);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("k-{}-{}", t, i);
                    dict.put(key.clone(), i);
                    assert_eq!(dict.get(&key), Some(i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dict.len(), 4000);
    }
}
