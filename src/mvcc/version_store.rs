//! Version Store - Manages per-key version chains for MVCC
//!
//! Each key owns a chain of versions ordered newest-first. At most one
//! version per chain is pending (uncommitted); everything below it is
//! committed and strictly ordered by commit order. Visibility is decided
//! against the reader's snapshot token, so readers never block writers and
//! writers never block readers.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;

use super::coordinator::{SnapshotToken, TxnId};
use crate::{GridError, GridResult};

// ============================================================================
// Version
// ============================================================================

/// A single version of a key's value
///
/// `commit_order` is empty while the owning transaction is still active.
/// `value == None` is a tombstone (the key was deleted by that version).
#[derive(Debug, Clone)]
pub struct Version {
    /// Transaction that created this version
    pub created_by: TxnId,
    /// Commit order assigned by the coordinator; None while pending
    pub commit_order: Option<u64>,
    /// Payload bytes; None marks a tombstone
    pub value: Option<Bytes>,
    /// Expiry deadline stamped at commit when a TTL is configured
    pub expires_at: Option<Instant>,
}

impl Version {
    fn pending(created_by: TxnId, value: Option<Bytes>) -> Self {
        Self {
            created_by,
            commit_order: None,
            value,
            expires_at: None,
        }
    }

    /// Whether this version has not been committed yet
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.commit_order.is_none()
    }

    /// Whether this version represents a deletion
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Whether the version's TTL has elapsed
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

// ============================================================================
// Version Chain
// ============================================================================

/// The version history of a single key, newest first
///
/// Invariants: the pending version (if any) sits at index 0; committed
/// versions are in strictly decreasing commit order below it.
#[derive(Debug, Default)]
pub struct VersionChain {
    versions: Vec<Version>,
    /// Set when the whole entry was evicted; readers holding a stale handle
    /// observe `EntryRemoved` through this flag
    obsolete: bool,
    /// Newest commit order at eviction time, kept so entry views can still
    /// answer `version()` on an obsolete chain
    evicted_order: u64,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the chain was removed by eviction
    #[inline]
    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    /// Commit order recorded when the chain was evicted
    #[inline]
    pub fn evicted_order(&self) -> u64 {
        self.evicted_order
    }

    /// The pending version, if any
    pub fn pending(&self) -> Option<&Version> {
        self.versions.first().filter(|v| v.is_pending())
    }

    /// Whether `txn` holds the pending slot
    pub fn has_pending_for(&self, txn: TxnId) -> bool {
        self.pending().is_some_and(|v| v.created_by == txn)
    }

    /// Newest committed version, if any
    pub fn newest_committed(&self) -> Option<&Version> {
        self.versions.iter().find(|v| !v.is_pending())
    }

    /// First version visible to `snapshot`, by the MVCC rule:
    /// a pending version only for its own transaction, a committed version
    /// iff its order is at or below the snapshot's read order and its
    /// creator was not active when the snapshot was taken.
    pub fn visible(&self, snapshot: &SnapshotToken) -> Option<&Version> {
        for v in &self.versions {
            match v.commit_order {
                None => {
                    if v.created_by == snapshot.txn_id {
                        return Some(v);
                    }
                }
                Some(order) => {
                    if snapshot.sees(order, v.created_by) {
                        return Some(v);
                    }
                }
            }
        }
        None
    }

    /// Read the payload visible to `snapshot`; tombstones and expired
    /// versions read as absent
    pub fn read(&self, snapshot: &SnapshotToken, now: Instant) -> Option<Bytes> {
        self.visible(snapshot)
            .filter(|v| !v.is_expired(now))
            .and_then(|v| v.value.clone())
    }

    /// Stage a pending version for `txn` (first-writer-wins per chain)
    ///
    /// A second write by the same transaction replaces its pending value in
    /// place, keeping the at-most-one-pending-per-transaction invariant.
    pub fn begin_write(&mut self, txn: TxnId, value: Option<Bytes>) -> GridResult<bool> {
        if let Some(first) = self.versions.first_mut() {
            if first.is_pending() {
                if first.created_by != txn {
                    return Err(GridError::WriteConflict);
                }
                first.value = value;
                return Ok(false);
            }
        }
        self.versions.insert(0, Version::pending(txn, value));
        Ok(true)
    }

    /// Commit `txn`'s pending version with its coordinator-assigned order
    pub fn commit_write(&mut self, txn: TxnId, order: u64, expires_at: Option<Instant>) -> bool {
        match self.versions.first_mut() {
            Some(v) if v.is_pending() && v.created_by == txn => {
                v.commit_order = Some(order);
                v.expires_at = expires_at;
                true
            }
            _ => false,
        }
    }

    /// Discard `txn`'s pending version; idempotent
    pub fn rollback_write(&mut self, txn: TxnId) -> bool {
        if self.has_pending_for(txn) {
            self.versions.remove(0);
            true
        } else {
            false
        }
    }

    /// Newest committed version created by another transaction with order
    /// above `read_order`; the serialization-conflict probe
    pub fn committed_after(&self, read_order: u64, me: TxnId) -> Option<(TxnId, u64)> {
        self.newest_committed()
            .and_then(|v| v.commit_order.map(|o| (v.created_by, o)))
            .filter(|&(by, o)| o > read_order && by != me)
    }

    /// Remove committed versions shadowed at `horizon`
    ///
    /// Keeps everything above the horizon plus exactly the newest committed
    /// version at or below it (the one that answers snapshots at the
    /// horizon). Pending versions are never touched. Returns the number of
    /// versions removed.
    pub fn prune(&mut self, horizon: u64) -> usize {
        let keeper = self
            .versions
            .iter()
            .position(|v| v.commit_order.is_some_and(|o| o <= horizon));
        let Some(keeper) = keeper else { return 0 };

        let removed = self.versions.len() - (keeper + 1);
        self.versions.truncate(keeper + 1);

        // A horizon tombstone with no committed version above it answers
        // every reachable snapshot with "absent"; the empty chain does the
        // same, so it can go too.
        let keeper_is_newest = self.versions[..keeper].iter().all(Version::is_pending);
        if keeper_is_newest && self.versions[keeper].is_tombstone() {
            self.versions.remove(keeper);
            return removed + 1;
        }
        removed
    }

    /// Mark the chain obsolete (entry evicted), recording the order fallback
    fn mark_obsolete(&mut self) {
        self.evicted_order = self
            .newest_committed()
            .and_then(|v| v.commit_order)
            .unwrap_or(0);
        self.obsolete = true;
    }

    /// Number of versions, pending included
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

// ============================================================================
// Version Store
// ============================================================================

/// Shared handle to one key's chain
pub type ChainHandle = Arc<RwLock<VersionChain>>;

/// Central store for all version chains
///
/// The outer map is only locked to resolve or insert a chain handle; all
/// chain mutation happens under that chain's own lock, so operations on
/// distinct keys do not contend.
pub struct VersionStore {
    chains: RwLock<BTreeMap<Bytes, ChainHandle>>,
    /// Total version count across chains (pruning heuristics, monitoring)
    total_versions: AtomicU64,
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(BTreeMap::new()),
            total_versions: AtomicU64::new(0),
        }
    }

    /// Resolve the chain handle for `key`, if present
    pub fn chain(&self, key: &Bytes) -> Option<ChainHandle> {
        self.chains.read().get(key).cloned()
    }

    fn chain_or_insert(&self, key: &Bytes) -> ChainHandle {
        if let Some(chain) = self.chain(key) {
            return chain;
        }
        let mut chains = self.chains.write();
        chains
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VersionChain::new())))
            .clone()
    }

    /// Read `key` as of `snapshot`
    pub fn read(&self, key: &Bytes, snapshot: &SnapshotToken) -> Option<Bytes> {
        let chain = self.chain(key)?;
        let chain = chain.read();
        if chain.is_obsolete() {
            return None;
        }
        chain.read(snapshot, Instant::now())
    }

    /// Stage a pending write (value or tombstone) for `txn`
    ///
    /// Fails with `WriteConflict` while another transaction holds the
    /// pending slot. A chain concurrently removed by eviction is retried
    /// once against a fresh chain before surfacing `EntryRemoved`.
    pub fn begin_write(&self, key: &Bytes, txn: TxnId, value: Option<Bytes>) -> GridResult<()> {
        for _ in 0..2 {
            let chain = self.chain_or_insert(key);
            let mut chain = chain.write();
            if chain.is_obsolete() {
                // Raced with eviction; the handle in the map is already gone
                continue;
            }
            if chain.begin_write(txn, value.clone())? {
                self.total_versions.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(());
        }
        Err(GridError::EntryRemoved)
    }

    /// Attach the commit order to `txn`'s pending version for `key`
    pub fn commit_write(&self, key: &Bytes, txn: TxnId, order: u64, expires_at: Option<Instant>) {
        if let Some(chain) = self.chain(key) {
            chain.write().commit_write(txn, order, expires_at);
        }
    }

    /// Discard `txn`'s pending version for `key`; idempotent
    pub fn rollback_write(&self, key: &Bytes, txn: TxnId) {
        let Some(chain) = self.chain(key) else { return };
        let emptied = {
            let mut chain = chain.write();
            if chain.rollback_write(txn) {
                self.total_versions.fetch_sub(1, Ordering::Relaxed);
            }
            chain.is_empty() && !chain.is_obsolete()
        };
        if emptied {
            self.drop_chain_if_empty(key);
        }
    }

    /// Serialization-conflict probe for the conflict detector
    pub fn committed_after(&self, key: &Bytes, read_order: u64, me: TxnId) -> Option<(TxnId, u64)> {
        self.chain(key)
            .and_then(|chain| chain.read().committed_after(read_order, me))
    }

    /// Prune one chain at `horizon`; drops the chain when nothing remains
    pub fn prune(&self, key: &Bytes, horizon: u64) -> usize {
        let Some(chain) = self.chain(key) else { return 0 };
        let (removed, emptied) = {
            let mut chain = chain.write();
            let removed = chain.prune(horizon);
            (removed, chain.is_empty() && !chain.is_obsolete())
        };
        if removed > 0 {
            self.total_versions.fetch_sub(removed as u64, Ordering::Relaxed);
        }
        if emptied {
            self.drop_chain_if_empty(key);
        }
        removed
    }

    /// Attempt whole-entry removal
    ///
    /// Refuses when the chain holds a pending version, or when committed
    /// data is present while transactions are active (`quiescent == false`,
    /// an active snapshot could still observe it). On success the chain is
    /// marked obsolete so stale handles fail with `EntryRemoved`.
    pub fn try_evict(&self, key: &Bytes, quiescent: bool) -> bool {
        let Some(chain) = self.chain(key) else { return false };
        let removed_versions = {
            let mut chain = chain.write();
            if chain.is_obsolete() || chain.pending().is_some() {
                return false;
            }
            if chain.newest_committed().is_some() && !quiescent {
                return false;
            }
            if chain.is_empty() {
                return false;
            }
            chain.mark_obsolete();
            chain.len()
        };
        self.chains.write().remove(key);
        self.total_versions
            .fetch_sub(removed_versions as u64, Ordering::Relaxed);
        true
    }

    fn drop_chain_if_empty(&self, key: &Bytes) {
        let mut chains = self.chains.write();
        if let Some(chain) = chains.get(key).cloned() {
            let mut guard = chain.write();
            if guard.is_empty() {
                // Obsolete the orphan handle so a writer that resolved it
                // concurrently retries against a fresh chain
                guard.mark_obsolete();
                drop(guard);
                chains.remove(key);
            }
        }
    }

    /// Snapshot of every chain handle, for the background prune sweep
    pub fn chain_handles(&self) -> Vec<(Bytes, ChainHandle)> {
        self.chains
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }

    /// Chain handles for a key range, captured eagerly for a lazy scan
    pub fn range_handles(
        &self,
        lower: Bound<Bytes>,
        upper: Bound<Bytes>,
    ) -> Vec<(Bytes, ChainHandle)> {
        self.chains
            .read()
            .range((lower, upper))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }

    /// Total number of version records
    pub fn total_versions(&self) -> u64 {
        self.total_versions.load(Ordering::Relaxed)
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
