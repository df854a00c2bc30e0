use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Stable chunk identifier derived from (collection, record key).
///
/// The numeric value is the redb key; [`Display`](std::fmt::Display) renders
/// a short hex form such as `#a1b2c3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub fn new(collection: &str, key: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        key.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn short(&self) -> String {
        self.hex(6)
    }

    /// Hex prefix of `len` digits, clamped to 6..=16.
    pub fn hex(&self, len: usize) -> String {
        let full = format!("{:016x}", self.0);
        full[..len.clamp(6, 16)].to_string()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short())
    }
}
