//! GridStore - the assembled transactional store
//!
//! Wires the coordinator, version store, transaction manager and eviction
//! manager together and exposes the surface the surrounding cache and the
//! query engine consume. All process-wide state is constructed here and
//! torn down on drop; nothing is reached through ambient globals.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::eviction::{EvictionManager, PruneStats};
use crate::config::GridConfig;
use crate::entry::{Affinity, EntryView, LocalAffinity};
use crate::mvcc::coordinator::{Coordinator, SnapshotToken, TxnId};
use crate::mvcc::version_store::VersionStore;
use crate::query::scan::{Predicate, Projection, Scan};
use crate::txn::manager::TxnManager;
use crate::GridResult;

/// Store identity counter, distinguishing entry views across store
/// instances in one process
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Store Statistics
// ============================================================================

/// Point-in-time monitoring snapshot
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub active_txns: usize,
    pub committed_txns: u64,
    pub aborted_txns: u64,
    pub keys: usize,
    pub versions: u64,
    pub entries_evicted: u64,
    pub versions_pruned: u64,
    pub hits: u64,
    pub misses: u64,
}

// ============================================================================
// Grid Store
// ============================================================================

/// The assembled store
pub struct GridStore {
    store: Arc<VersionStore>,
    coordinator: Arc<Coordinator>,
    txns: TxnManager,
    eviction: Arc<EvictionManager>,
    affinity: Arc<dyn Affinity>,
    store_id: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GridStore {
    /// Build a store with single-node affinity
    pub fn new(config: GridConfig) -> Self {
        let affinity = Arc::new(LocalAffinity::new(config.partitions));
        Self::with_affinity(config, affinity)
    }

    /// Build a store with an injected topology collaborator
    pub fn with_affinity(config: GridConfig, affinity: Arc<dyn Affinity>) -> Self {
        let store = Arc::new(VersionStore::new());
        let coordinator = Arc::new(Coordinator::new());
        let txns = TxnManager::new(Arc::clone(&store), Arc::clone(&coordinator), &config);
        let eviction = Arc::new(EvictionManager::new(
            Arc::clone(&store),
            Arc::clone(&coordinator),
            &config,
        ));
        let store_id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("gridbase store {} started", store_id);
        Self {
            store,
            coordinator,
            txns,
            eviction,
            affinity,
            store_id,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction; the returned token is both the transaction
    /// handle and its read snapshot
    pub fn begin(&self) -> SnapshotToken {
        self.txns.begin()
    }

    /// Commit a transaction; on success, capacity pressure introduced by
    /// its writes is relieved immediately
    pub fn commit(&self, txn: TxnId) -> GridResult<()> {
        self.txns.commit(txn)?;
        self.eviction.enforce_capacity();
        Ok(())
    }

    /// Roll back a transaction; idempotent
    pub fn rollback(&self, txn: TxnId) {
        self.txns.rollback(txn)
    }

    // ========================================================================
    // Data access
    // ========================================================================

    /// Read `key` as of `snapshot`, recording the access for eviction
    /// ranking
    pub fn get(&self, snapshot: &SnapshotToken, key: &Bytes) -> Option<Bytes> {
        let value = self.store.read(key, snapshot);
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        self.eviction.touch(key);
        value
    }

    /// Stage a value write in `txn`
    pub fn put(&self, txn: TxnId, key: Bytes, value: Bytes) -> GridResult<()> {
        self.eviction.touch(&key);
        self.txns.put(txn, key, value)
    }

    /// Stage a delete in `txn`
    pub fn remove(&self, txn: TxnId, key: Bytes) -> GridResult<()> {
        self.txns.remove(txn, key)
    }

    /// Snapshot-consistent range scan for the query engine
    pub fn scan(
        &self,
        snapshot: SnapshotToken,
        lower: Bound<Bytes>,
        upper: Bound<Bytes>,
        predicate: Option<Predicate>,
        projection: Option<Projection>,
    ) -> Scan {
        Scan::new(&self.store, snapshot, lower, upper, predicate, projection)
    }

    /// Read-only view over `key`'s entry, if present
    pub fn entry(&self, key: Bytes) -> Option<EntryView> {
        let chain = self.store.chain(&key)?;
        Some(EntryView::new(
            key,
            chain,
            Arc::clone(&self.eviction),
            Arc::clone(&self.affinity),
            self.store_id,
        ))
    }

    // ========================================================================
    // Eviction surface
    // ========================================================================

    /// Record an access for policy ranking
    pub fn touch(&self, key: &Bytes) {
        self.eviction.touch(key)
    }

    /// Attempt whole-entry eviction; false when unsafe
    pub fn evict(&self, key: &Bytes) -> bool {
        self.eviction.evict(key)
    }

    /// Background sweep hook, invocable on a timer
    pub fn prune_all(&self) -> Option<PruneStats> {
        self.eviction.prune_all()
    }

    /// Interval-gated variant of `prune_all`
    pub fn maybe_prune_all(&self) -> Option<PruneStats> {
        self.eviction.maybe_prune_all()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Active transaction count; operators poll this to confirm
    /// drain-to-quiescence before destructive maintenance
    pub fn active_txn_count(&self) -> usize {
        self.coordinator.active_count()
    }

    /// Monitoring snapshot
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            active_txns: self.coordinator.active_count(),
            committed_txns: self.txns.total_committed(),
            aborted_txns: self.txns.total_aborted(),
            keys: self.store.len(),
            versions: self.store.total_versions(),
            entries_evicted: self.eviction.total_evicted(),
            versions_pruned: self.eviction.total_pruned(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Drop for GridStore {
    fn drop(&mut self) {
        log::info!("gridbase store {} stopped", self.store_id);
    }
}

// ============================================================================
// Tests
// ============================================================================
