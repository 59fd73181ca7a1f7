//! Transaction Manager - Lifecycle management for transactions
//!
//! Coordinates begin, reads/writes, commit, and rollback across the
//! Coordinator, VersionStore and ConflictDetector. Writes are staged as
//! pending versions in the chains immediately; commit validates and then
//! stamps them with the commit order, rollback discards them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::GridConfig;
use crate::mvcc::coordinator::{Coordinator, SnapshotToken, TxnId, TxnOutcome};
use crate::mvcc::version_store::VersionStore;
use crate::{GridError, GridResult};

use super::conflict::ConflictDetector;
use super::context::TxnContext;

/// Central transaction manager
///
/// Lifecycle:
/// 1. `begin`: coordinator snapshot + context
/// 2. `put`/`remove`: pending version in the chain + buffered intent
/// 3. `commit`: validate (first-committer-wins) → stamp commit order
/// 4. `rollback`: discard pending versions; idempotent
pub struct TxnManager {
    store: Arc<VersionStore>,
    coordinator: Arc<Coordinator>,
    detector: ConflictDetector,
    /// Active transactions: txn_id → context
    active: RwLock<AHashMap<TxnId, TxnContext>>,
    /// TTL stamped onto versions at commit
    ttl: Option<Duration>,
    /// Touched-key cap per transaction
    max_keys: usize,
    /// Total committed transactions (for monitoring)
    total_committed: AtomicU64,
    /// Total aborted transactions (for monitoring)
    total_aborted: AtomicU64,
}

impl TxnManager {
    pub fn new(store: Arc<VersionStore>, coordinator: Arc<Coordinator>, config: &GridConfig) -> Self {
        Self {
            store,
            coordinator,
            detector: ConflictDetector::new(),
            active: RwLock::new(AHashMap::new()),
            ttl: config.ttl,
            max_keys: config.max_keys_per_txn,
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Transaction Lifecycle
    // ========================================================================

    /// BEGIN - allocate a snapshot and register the transaction
    pub fn begin(&self) -> SnapshotToken {
        let snapshot = self.coordinator.begin();
        let ctx = TxnContext::new(snapshot.clone(), self.max_keys);
        self.active.write().insert(snapshot.txn_id, ctx);
        snapshot
    }

    /// Read `key` through the transaction's snapshot (own pending writes
    /// included)
    pub fn get(&self, txn: TxnId, key: &Bytes) -> GridResult<Option<Bytes>> {
        let active = self.active.read();
        let ctx = active.get(&txn).ok_or(GridError::TxnNotFound(txn))?;
        Ok(self.store.read(key, ctx.snapshot()))
    }

    /// Stage a value write for `key`
    pub fn put(&self, txn: TxnId, key: Bytes, value: Bytes) -> GridResult<()> {
        self.write(txn, key, Some(value))
    }

    /// Stage a delete (tombstone) for `key`
    pub fn remove(&self, txn: TxnId, key: Bytes) -> GridResult<()> {
        self.write(txn, key, None)
    }

    fn write(&self, txn: TxnId, key: Bytes, value: Option<Bytes>) -> GridResult<()> {
        let mut active = self.active.write();
        let ctx = active.get_mut(&txn).ok_or(GridError::TxnNotFound(txn))?;

        if ctx.would_exceed_cap(&key) {
            // Hard abort: bound the memory held by pending versions
            let ctx = active.remove(&txn).expect("context present");
            drop(active);
            self.abort(ctx, TxnOutcome::TooLarge);
            return Err(GridError::TransactionTooLarge {
                limit: self.max_keys,
            });
        }

        // Chain-level first-writer-wins; the context stays untouched on
        // conflict so the caller may retry after backoff
        self.store.begin_write(&key, txn, value.clone())?;
        ctx.record_write(key, value)
    }

    /// COMMIT - validate and publish all staged writes, or roll back
    ///
    /// No partial commit is ever observable: validation happens before any
    /// version receives its commit order, and a failed validation discards
    /// every pending version.
    pub fn commit(&self, txn: TxnId) -> GridResult<()> {
        let mut ctx = {
            self.active
                .write()
                .remove(&txn)
                .ok_or(GridError::TxnNotFound(txn))?
        };

        if let Err(e) = ctx.begin_commit() {
            self.abort(ctx, TxnOutcome::RolledBack);
            return Err(e);
        }

        if !ctx.has_writes() {
            ctx.mark_committed();
            self.coordinator.finish(txn, TxnOutcome::Committed);
            self.total_committed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let order = self.coordinator.prepare_commit(txn);

        if let Err(e) = self.detector.validate(&ctx, &self.store) {
            self.abort(ctx, TxnOutcome::RolledBack);
            return Err(e);
        }

        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        for key in ctx.touched_keys() {
            self.store.commit_write(key, txn, order, expires_at);
        }

        ctx.mark_committed();
        self.coordinator.finish(txn, TxnOutcome::Committed);
        self.total_committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// ROLLBACK - discard all staged writes; idempotent, and a no-op for
    /// transactions already finished (a timed-out transaction forcibly
    /// aborted earlier looks the same to the caller)
    pub fn rollback(&self, txn: TxnId) {
        let Some(ctx) = self.active.write().remove(&txn) else {
            return;
        };
        self.abort(ctx, TxnOutcome::RolledBack);
    }

    fn abort(&self, mut ctx: TxnContext, outcome: TxnOutcome) {
        let txn = ctx.txn_id();
        for key in ctx.touched_keys() {
            self.store.rollback_write(key, txn);
        }
        ctx.mark_rolled_back();
        self.coordinator.finish(txn, outcome);
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Number of active transactions
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Whether a transaction is still active
    pub fn is_active(&self, txn: TxnId) -> bool {
        self.active.read().contains_key(&txn)
    }

    /// Total committed transactions
    pub fn total_committed(&self) -> u64 {
        self.total_committed.load(Ordering::Relaxed)
    }

    /// Total aborted transactions
    pub fn total_aborted(&self) -> u64 {
        self.total_aborted.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TxnManager {
        let store = Arc::new(VersionStore::new());
        let coordinator = Arc::new(Coordinator::new());
        TxnManager::new(store, coordinator, &GridConfig::default())
    }

    fn manager_with(config: GridConfig) -> TxnManager {
        let store = Arc::new(VersionStore::new());
        let coordinator = Arc::new(Coordinator::new());
        TxnManager::new(store, coordinator, &config)
    }

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_begin_commit_roundtrip() {
        let mgr = manager();
        let t1 = mgr.begin();
        mgr.put(t1.txn_id, key("k"), key("v")).unwrap();
        assert_eq!(mgr.get(t1.txn_id, &key("k")).unwrap(), Some(key("v")));
        mgr.commit(t1.txn_id).unwrap();

        let t2 = mgr.begin();
        assert_eq!(mgr.get(t2.txn_id, &key("k")).unwrap(), Some(key("v")));
        assert_eq!(mgr.total_committed(), 1);
    }

    #[test]
    fn test_snapshot_isolation() {
        let mgr = manager();

        // T1 begins first; T2 commits while T1 is still active
        let t1 = mgr.begin();
        assert_eq!(mgr.get(t1.txn_id, &key("k")).unwrap(), None);

        let t2 = mgr.begin();
        mgr.put(t2.txn_id, key("k"), key("5")).unwrap();
        mgr.commit(t2.txn_id).unwrap();

        // T1's snapshot predates T2: still absent
        assert_eq!(mgr.get(t1.txn_id, &key("k")).unwrap(), None);

        // A transaction begun after T2's commit sees the value
        let t3 = mgr.begin();
        assert_eq!(mgr.get(t3.txn_id, &key("k")).unwrap(), Some(key("5")));
    }

    #[test]
    fn test_first_committer_wins() {
        let mgr = manager();

        let t1 = mgr.begin();
        let t2 = mgr.begin();

        mgr.put(t1.txn_id, key("k"), key("a")).unwrap();
        mgr.commit(t1.txn_id).unwrap();

        // T2's snapshot predates T1's commit; writing the same key must
        // fail at commit with a serialization conflict
        mgr.put(t2.txn_id, key("k"), key("b")).unwrap();
        let err = mgr.commit(t2.txn_id).unwrap_err();
        assert!(matches!(err, GridError::SerializationConflict { .. }));
        assert_eq!(mgr.total_aborted(), 1);

        // T1's value survived
        let t3 = mgr.begin();
        assert_eq!(mgr.get(t3.txn_id, &key("k")).unwrap(), Some(key("a")));
    }

    #[test]
    fn test_pending_write_conflict_is_immediate() {
        let mgr = manager();
        let t1 = mgr.begin();
        let t2 = mgr.begin();

        mgr.put(t1.txn_id, key("k"), key("a")).unwrap();
        let err = mgr.put(t2.txn_id, key("k"), key("b")).unwrap_err();
        assert!(matches!(err, GridError::WriteConflict));

        // T2 is still usable on other keys
        mgr.put(t2.txn_id, key("other"), key("b")).unwrap();
        mgr.commit(t2.txn_id).unwrap();
    }

    #[test]
    fn test_rollback_discards_writes_and_is_idempotent() {
        let mgr = manager();
        let t1 = mgr.begin();
        mgr.put(t1.txn_id, key("k"), key("v")).unwrap();
        mgr.rollback(t1.txn_id);
        mgr.rollback(t1.txn_id);

        let t2 = mgr.begin();
        assert_eq!(mgr.get(t2.txn_id, &key("k")).unwrap(), None);
        assert_eq!(mgr.total_aborted(), 1);
        assert_eq!(mgr.active_count(), 1);
    }

    #[test]
    fn test_transaction_too_large_is_forced_abort() {
        let mgr = manager_with(GridConfig {
            max_keys_per_txn: 2,
            ..Default::default()
        });

        let t = mgr.begin();
        mgr.put(t.txn_id, key("a"), key("1")).unwrap();
        mgr.put(t.txn_id, key("b"), key("2")).unwrap();
        let err = mgr.put(t.txn_id, key("c"), key("3")).unwrap_err();
        assert!(matches!(err, GridError::TransactionTooLarge { limit: 2 }));

        // The transaction is gone and its pending writes are discarded
        assert!(!mgr.is_active(t.txn_id));
        let t2 = mgr.begin();
        assert_eq!(mgr.get(t2.txn_id, &key("a")).unwrap(), None);

        // Indistinguishable from a caller rollback
        mgr.rollback(t.txn_id);
        assert!(matches!(
            mgr.commit(t.txn_id).unwrap_err(),
            GridError::TxnNotFound(_)
        ));
    }

    #[test]
    fn test_delete_then_reread_returns_none() {
        let mgr = manager();
        let t1 = mgr.begin();
        mgr.put(t1.txn_id, key("k"), key("v")).unwrap();
        mgr.commit(t1.txn_id).unwrap();

        let t2 = mgr.begin();
        mgr.remove(t2.txn_id, key("k")).unwrap();
        // Own tombstone reads as absent before commit
        assert_eq!(mgr.get(t2.txn_id, &key("k")).unwrap(), None);
        mgr.commit(t2.txn_id).unwrap();

        let t3 = mgr.begin();
        assert_eq!(mgr.get(t3.txn_id, &key("k")).unwrap(), None);
    }

    #[test]
    fn test_concurrent_disjoint_commits() {
        let mgr = Arc::new(manager());

        std::thread::scope(|s| {
            for i in 0..8u32 {
                let mgr = Arc::clone(&mgr);
                s.spawn(move || {
                    let t = mgr.begin();
                    let k = Bytes::copy_from_slice(format!("k{i}").as_bytes());
                    mgr.put(t.txn_id, k, key("v")).unwrap();
                    mgr.commit(t.txn_id).unwrap();
                });
            }
        });

        assert_eq!(mgr.total_committed(), 8);
        assert_eq!(mgr.active_count(), 0);
    }
}
