//! Consistent-hash ring mapping keys to peer nodes.
//!
//! Each node contributes `replicas` virtual positions, hashed from the
//! decimal replica index prefixed to the node address. Positions are kept
//! sorted; a key routes to the first position at or after its own hash,
//! wrapping to the start of the ring.
//!
//! Keys may carry a hash tag: for `user:{42}:name` only `42` is hashed, so
//! related keys co-locate on one peer.

use std::collections::HashMap;

/// Placement hash over ring positions and partition keys.
pub type HashFn = fn(&[u8]) -> u32;

/// Default number of virtual nodes per peer.
pub const DEFAULT_REPLICAS: usize = 1;

fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A consistent-hash ring over peer addresses. Nodes can be added; removal
/// is not supported.
pub struct ConsistentHashRing {
    hash: HashFn,
    replicas: usize,
    positions: Vec<u32>,
    nodes: HashMap<u32, String>,
}

impl ConsistentHashRing {
    /// Creates a ring with `replicas` virtual nodes per peer and an optional
    /// hash override (CRC-32/IEEE by default).
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        Self {
            hash: hash.unwrap_or(crc32_ieee),
            replicas: replicas.max(1),
            positions: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Inserts the given peers' virtual nodes into the ring.
    pub fn add_nodes<S: AsRef<str>>(&mut self, nodes: &[S]) {
        for node in nodes {
            let node = node.as_ref();
            if node.is_empty() {
                continue;
            }
            for replica in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", replica, node).as_bytes());
                self.positions.push(position);
                self.nodes.insert(position, node.to_string());
            }
        }
        self.positions.sort_unstable();
    }

    /// Picks the peer owning `key`, honoring `{...}` hash tags.
    pub fn pick_node(&self, key: &str) -> Option<&str> {
        if self.is_empty() {
            return None;
        }

        let hash = (self.hash)(partition_key(key).as_bytes());
        let at = self.positions.partition_point(|&p| p < hash);
        let position = if at == self.positions.len() {
            self.positions[0]
        } else {
            self.positions[at]
        };
        self.nodes.get(&position).map(String::as_str)
    }
}

/// The substring between the first `{` and the following `}`, when both
/// exist and the content is non-empty; otherwise the whole key.
fn partition_key(key: &str) -> &str {
    let Some(open) = key.find('{') else {
        return key;
    };
    match key[open + 1..].find('}') {
        Some(0) | None => key,
        Some(close) => &key[open + 1..open + 1 + close],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(nodes: &[&str]) -> ConsistentHashRing {
        let mut ring = ConsistentHashRing::new(DEFAULT_REPLICAS, None);
        ring.add_nodes(nodes);
        ring
    }

    #[test]
    fn test_empty_ring() {
        let ring = ConsistentHashRing::new(1, None);
        assert!(ring.is_empty());
        assert_eq!(ring.pick_node("k"), None);
    }

    #[test]
    fn test_partition_key_extraction() {
        assert_eq!(partition_key("plain"), "plain");
        assert_eq!(partition_key("user:{42}:name"), "42");
        assert_eq!(partition_key("{tag}x"), "tag");
        // Empty or unterminated tags fall back to the whole key.
        assert_eq!(partition_key("a{}b"), "a{}b");
        assert_eq!(partition_key("a{open"), "a{open");
    }

    #[test]
    fn test_pick_is_deterministic() {
        let ring = ring(&["a:1", "b:2", "c:3"]);
        for key in ["alpha", "beta", "gamma", ""] {
            let first = ring.pick_node(key).unwrap().to_string();
            for _ in 0..10 {
                assert_eq!(ring.pick_node(key).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_hash_tags_colocate() {
        let ring = ring(&["a:1", "b:2", "c:3"]);
        let x = ring.pick_node("{tag}x").unwrap();
        let y = ring.pick_node("{tag}y").unwrap();
        let bare = ring.pick_node("tag").unwrap();
        assert_eq!(x, y);
        assert_eq!(x, bare);
    }

    #[test]
    fn test_all_nodes_reachable() {
        let ring = ring(&["a:1", "b:2", "c:3"]);
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            seen.insert(ring.pick_node(&format!("key:{}", i)).unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_wraparound() {
        // A custom hash forces the key past every position, exercising the
        // wrap to index zero.
        fn fixed(data: &[u8]) -> u32 {
            if data.starts_with(b"0") {
                100
            } else {
                u32::MAX
            }
        }
        let mut ring = ConsistentHashRing::new(1, Some(fixed));
        ring.add_nodes(&["only:1"]);
        assert_eq!(ring.pick_node("anything"), Some("only:1"));
    }

    #[test]
    fn test_replicas_spread_positions() {
        let mut ring = ConsistentHashRing::new(4, None);
        ring.add_nodes(&["a:1", "b:2"]);
        assert_eq!(ring.positions.len(), 8);
    }

    #[test]
    fn test_empty_node_names_skipped() {
        let mut ring = ConsistentHashRing::new(1, None);
        ring.add_nodes(&["", "a:1"]);
        assert_eq!(ring.positions.len(), 1);
    }
}
