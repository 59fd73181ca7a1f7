//! Eviction Manager - safe reclamation of versions and cold entries
//!
//! Pruning removes committed versions shadowed at the coordinator's
//! oldest-watermark horizon; entry eviction removes whole cold entries
//! ranked by the LRU policy. Neither ever removes state an active snapshot
//! can still observe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::GridConfig;
use crate::mvcc::coordinator::Coordinator;
use crate::mvcc::version_store::VersionStore;

use super::lru::LruPolicy;

// ============================================================================
// Sweep Statistics
// ============================================================================

/// Statistics from one prune sweep
#[derive(Debug, Clone, Default)]
pub struct PruneStats {
    /// Number of versions removed
    pub versions_removed: usize,
    /// Horizon the sweep ran with
    pub horizon: u64,
    /// Duration of the sweep
    pub duration: Duration,
}

// ============================================================================
// Eviction Manager
// ============================================================================

/// Policy-driven eviction over the version store
///
/// Safety is delegated to the coordinator: pruning uses the oldest active
/// watermark as its horizon, and whole-entry eviction refuses entries a
/// live snapshot could observe.
pub struct EvictionManager {
    store: Arc<VersionStore>,
    coordinator: Arc<Coordinator>,
    policy: Mutex<LruPolicy>,
    /// Entry count above which capacity eviction kicks in
    max_entries: usize,
    /// Whether capacity eviction is enabled
    enabled: bool,
    /// Minimum interval between background sweeps
    sweep_interval: Duration,
    /// Last sweep time, epoch millis
    last_sweep: AtomicU64,
    /// Whether a sweep is currently in progress
    running: AtomicBool,
    /// Total versions pruned across all sweeps
    total_pruned: AtomicU64,
    /// Total entries evicted
    total_evicted: AtomicU64,
}

impl EvictionManager {
    pub fn new(store: Arc<VersionStore>, coordinator: Arc<Coordinator>, config: &GridConfig) -> Self {
        Self {
            store,
            coordinator,
            policy: Mutex::new(LruPolicy::new()),
            max_entries: config.max_entries,
            enabled: config.eviction_enabled,
            sweep_interval: config.prune_interval,
            last_sweep: AtomicU64::new(0),
            running: AtomicBool::new(false),
            total_pruned: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Access ranking
    // ========================================================================

    /// Record an access for policy ranking; side effect only
    pub fn touch(&self, key: &Bytes) {
        if self.enabled {
            self.policy.lock().touch(key);
        }
    }

    /// Stop tracking a key removed through other paths
    pub fn forget(&self, key: &Bytes) {
        self.policy.lock().remove(key);
    }

    // ========================================================================
    // Entry eviction
    // ========================================================================

    /// Attempt to remove the entry for `key` entirely
    ///
    /// Returns false (no error) when the key is absent, a transaction holds
    /// its pending slot, or an active snapshot could still observe the
    /// entry.
    pub fn evict(&self, key: &Bytes) -> bool {
        let quiescent = !self.coordinator.has_active();
        if self.store.try_evict(key, quiescent) {
            self.policy.lock().remove(key);
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
            log::debug!("evicted entry ({} bytes key)", key.len());
            true
        } else {
            false
        }
    }

    /// Evict coldest entries until the store is back under `max_entries`
    ///
    /// Unsafe candidates (pending writers, observable by a snapshot) are
    /// skipped and re-ranked hot so the next pass tries colder ones first.
    pub fn enforce_capacity(&self) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut evicted = 0;
        let mut skipped = Vec::new();
        while self.store.len() > self.max_entries {
            let Some(key) = self.policy.lock().pop_coldest() else {
                break;
            };
            let quiescent = !self.coordinator.has_active();
            if self.store.try_evict(&key, quiescent) {
                self.total_evicted.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            } else if self.store.chain(&key).is_some() {
                skipped.push(key);
            }
            // Keys with no chain left were stale policy entries; dropped
        }

        let mut policy = self.policy.lock();
        for key in &skipped {
            policy.touch(key);
        }
        evicted
    }

    // ========================================================================
    // Version pruning
    // ========================================================================

    /// Sweep every chain, pruning versions shadowed at the current horizon
    ///
    /// Safe to run concurrently with reads and writes: only versions
    /// unreachable by any active or future snapshot are removed. A sweep
    /// already in progress turns this call into a no-op.
    pub fn prune_all(&self) -> Option<PruneStats> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let start = Instant::now();
        let horizon = self.coordinator.oldest_active_watermark();

        let handles = self.store.chain_handles();
        let versions_removed: usize = handles
            .par_iter()
            .map(|(key, _)| self.store.prune(key, horizon))
            .sum();

        self.total_pruned
            .fetch_add(versions_removed as u64, Ordering::Relaxed);
        self.touch_last_sweep();
        self.running.store(false, Ordering::SeqCst);

        let stats = PruneStats {
            versions_removed,
            horizon,
            duration: start.elapsed(),
        };
        log::debug!(
            "prune sweep: {} versions removed at horizon {} in {:?}",
            stats.versions_removed,
            stats.horizon,
            stats.duration
        );
        Some(stats)
    }

    /// Run a sweep if the configured interval has elapsed (timer hook)
    pub fn maybe_prune_all(&self) -> Option<PruneStats> {
        let now = epoch_millis();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.sweep_interval.as_millis() as u64 {
            return None;
        }
        self.prune_all()
    }

    fn touch_last_sweep(&self) {
        self.last_sweep.store(epoch_millis(), Ordering::Relaxed);
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Total versions pruned across all sweeps
    pub fn total_pruned(&self) -> u64 {
        self.total_pruned.load(Ordering::Relaxed)
    }

    /// Total entries evicted
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted.load(Ordering::Relaxed)
    }

    /// Whether a sweep is currently running
    pub fn is_sweeping(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::coordinator::TxnOutcome;

    fn setup() -> (Arc<VersionStore>, Arc<Coordinator>, EvictionManager) {
        setup_with(GridConfig::default())
    }

    fn setup_with(config: GridConfig) -> (Arc<VersionStore>, Arc<Coordinator>, EvictionManager) {
        let store = Arc::new(VersionStore::new());
        let coordinator = Arc::new(Coordinator::new());
        let mgr = EvictionManager::new(Arc::clone(&store), Arc::clone(&coordinator), &config);
        (store, coordinator, mgr)
    }

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn commit_value(store: &VersionStore, coordinator: &Coordinator, k: &Bytes, v: &str) -> u64 {
        let snap = coordinator.begin();
        store
            .begin_write(k, snap.txn_id, Some(Bytes::copy_from_slice(v.as_bytes())))
            .unwrap();
        let order = coordinator.prepare_commit(snap.txn_id);
        store.commit_write(k, snap.txn_id, order, None);
        coordinator.finish(snap.txn_id, TxnOutcome::Committed);
        order
    }

    #[test]
    fn test_prune_sweep_respects_watermark() {
        let (store, coordinator, mgr) = setup();
        let k = key("a");

        let o1 = commit_value(&store, &coordinator, &k, "v1");

        // A reader pinned at o1 keeps the first version alive
        let reader = coordinator.begin();
        assert_eq!(reader.read_order, o1);

        commit_value(&store, &coordinator, &k, "v2");
        commit_value(&store, &coordinator, &k, "v3");
        assert_eq!(store.total_versions(), 3);

        let stats = mgr.prune_all().unwrap();
        assert_eq!(stats.horizon, o1);
        // v1 is the horizon answer and v2/v3 sit above it: nothing removable
        assert_eq!(stats.versions_removed, 0);
        assert_eq!(store.read(&k, &reader), Some(key("v1")));

        // Reader finishes: the horizon advances and shadowed versions go
        coordinator.finish(reader.txn_id, TxnOutcome::RolledBack);
        let stats = mgr.prune_all().unwrap();
        assert_eq!(stats.versions_removed, 2);
        assert_eq!(store.total_versions(), 1);
    }

    #[test]
    fn test_evict_refused_while_snapshot_active() {
        let (store, coordinator, mgr) = setup();
        let k = key("a");
        commit_value(&store, &coordinator, &k, "v1");

        let reader = coordinator.begin();
        mgr.touch(&k);
        assert!(!mgr.evict(&k));
        assert_eq!(store.read(&k, &reader), Some(key("v1")));

        coordinator.finish(reader.txn_id, TxnOutcome::RolledBack);
        assert!(mgr.evict(&k));
        assert!(store.chain(&k).is_none());
        assert_eq!(mgr.total_evicted(), 1);
    }

    #[test]
    fn test_evict_refused_on_pending_writer() {
        let (store, coordinator, mgr) = setup();
        let k = key("a");

        let writer = coordinator.begin();
        store.begin_write(&k, writer.txn_id, Some(key("wip"))).unwrap();
        coordinator.finish(writer.txn_id, TxnOutcome::RolledBack);

        // Pending version present: refused even when quiescent
        assert!(!mgr.evict(&k));
    }

    #[test]
    fn test_enforce_capacity_evicts_coldest_first() {
        let (store, coordinator, mgr) = setup_with(GridConfig {
            max_entries: 2,
            ..Default::default()
        });

        for name in ["a", "b", "c", "d"] {
            let k = key(name);
            commit_value(&store, &coordinator, &k, name);
            mgr.touch(&k);
        }
        // Warm "a" so "b" is the coldest
        mgr.touch(&key("a"));

        let evicted = mgr.enforce_capacity();
        assert_eq!(evicted, 2);
        assert_eq!(store.len(), 2);
        assert!(store.chain(&key("b")).is_none());
        assert!(store.chain(&key("c")).is_none());
        assert!(store.chain(&key("a")).is_some());
        assert!(store.chain(&key("d")).is_some());
    }

    #[test]
    fn test_enforce_capacity_disabled() {
        let (store, coordinator, mgr) = setup_with(GridConfig {
            max_entries: 1,
            eviction_enabled: false,
            ..Default::default()
        });
        commit_value(&store, &coordinator, &key("a"), "v");
        commit_value(&store, &coordinator, &key("b"), "v");
        assert_eq!(mgr.enforce_capacity(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_sweep_is_noop() {
        let (_store, _coordinator, mgr) = setup();
        mgr.running.store(true, Ordering::SeqCst);
        assert!(mgr.prune_all().is_none());
        mgr.running.store(false, Ordering::SeqCst);
        assert!(mgr.prune_all().is_some());
    }
}
