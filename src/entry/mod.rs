//! Entry views - restricted projections over single entries
//!
//! Iteration and eviction callers get a read-only cursor over one key's
//! chain instead of the full mutable cache surface; every mutating
//! operation on the view is an explicit failure, never a silent no-op.

pub mod view;

use bytes::Bytes;

pub use view::{decode_entry, encode_entry, EntryView, PeekMode};

/// Partition ownership collaborator
///
/// Supplied by the surrounding cluster topology; the core only classifies,
/// it never routes.
pub trait Affinity: Send + Sync {
    fn is_primary(&self, key: &Bytes) -> bool;
    fn is_backup(&self, key: &Bytes) -> bool;
    fn partition(&self, key: &Bytes) -> u32;
}

/// Single-node affinity: every key is primary and owned locally
pub struct LocalAffinity {
    partitions: u32,
}

impl LocalAffinity {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }
}

impl Affinity for LocalAffinity {
    fn is_primary(&self, _key: &Bytes) -> bool {
        true
    }

    fn is_backup(&self, _key: &Bytes) -> bool {
        false
    }

    fn partition(&self, key: &Bytes) -> u32 {
        use std::hash::{BuildHasher, Hasher};
        let mut hasher = ahash::RandomState::with_seeds(7, 11, 13, 17).build_hasher();
        hasher.write(key);
        (hasher.finish() % self.partitions as u64) as u32
    }
}
