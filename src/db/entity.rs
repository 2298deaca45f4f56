//! Typed values bound to keys.

use bytes::Bytes;
use std::collections::HashMap;

/// The payload stored under a key.
///
/// A tagged sum over the supported value types. `TYPE` inspects the tag, and
/// typed commands fail with WRONGTYPE when it mismatches. List, set and
/// sorted-set variants join here as their commands are wired up.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEntity {
    /// Binary-safe string value.
    Bytes(Bytes),
    /// Field-to-value mapping.
    Hash(HashMap<String, Bytes>),
}

impl DataEntity {
    /// The canonical type name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Bytes(_) => "string",
            DataEntity::Hash(_) => "hash",
        }
    }

    /// Views the string payload, if this is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DataEntity::Bytes(b) => Some(b),
            _ => None,
        }
    }
}
