//! Content-addressed store of cacheable chunk blobs.
//!
//! Entries are keyed by the xxHash64 of their bytes, so identical sections
//! from different columns share a single entry. Positions are kept only for
//! bookkeeping. The store keeps creation order and evicts the oldest entries
//! once it grows past its capacity.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

/// Entries kept when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 64;

/// 64-bit blob id.
///
/// Raw, wire and string forms all normalize to this value, so a hash
/// received as bytes and one parsed from text address the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(pub u64);

impl From<u64> for BlobHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<[u8; 8]> for BlobHash {
    fn from(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl FromStr for BlobHash {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(digits, 16).map(Self)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    ChunkSection,
    Biomes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPosition {
    pub x: i32,
    /// Absent for whole-column blobs such as biomes.
    pub y: Option<i32>,
    pub z: i32,
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub kind: BlobKind,
    pub position: BlobPosition,
    pub bytes: Bytes,
    pub created_at: Instant,
}

impl BlobEntry {
    pub fn new(kind: BlobKind, position: BlobPosition, bytes: Bytes) -> Self {
        Self {
            kind,
            position,
            bytes,
            created_at: Instant::now(),
        }
    }
}

/// One reference in a cached chunk's hash list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedBlob {
    pub hash: BlobHash,
    pub kind: BlobKind,
}

/// Shared blob store. Reads run concurrently, writes are serialized.
#[derive(Debug)]
pub struct BlobStore {
    entries: RwLock<IndexMap<BlobHash, BlobEntry>>,
    capacity: usize,
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BlobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or refresh an entry, then evict the oldest entries past capacity.
    pub fn write(&self, hash: BlobHash, entry: BlobEntry) {
        let mut entries = self.entries.write();
        // re-inserting moves the hash to the young end
        entries.shift_remove(&hash);
        entries.insert(hash, entry);
        while entries.len() > self.capacity {
            if let Some((evicted, old)) = entries.shift_remove_index(0) {
                debug!(hash = %evicted, kind = ?old.kind, "evicted cached blob");
            }
        }
    }

    pub fn read(&self, hash: BlobHash) -> Option<BlobEntry> {
        self.entries.read().get(&hash).cloned()
    }

    pub fn has(&self, hash: BlobHash) -> bool {
        self.entries.read().contains_key(&hash)
    }

    pub fn remove(&self, hash: BlobHash) -> Option<BlobEntry> {
        self.entries.write().shift_remove(&hash)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// References whose hash is not stored, in the order given.
    pub fn missing(&self, blobs: &[CachedBlob]) -> Vec<CachedBlob> {
        let entries = self.entries.read();
        blobs
            .iter()
            .filter(|b| !entries.contains_key(&b.hash))
            .copied()
            .collect()
    }
}
