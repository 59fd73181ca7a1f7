//! MVCC Coordinator - Issues snapshots and commit orders
//!
//! Single logical sequencer for the store: allocates strictly increasing
//! transaction ids and commit orders, owns the active transaction set, and
//! answers the oldest-watermark query that bounds eviction. In a clustered
//! deployment this authority would be replicated and re-elected; no such
//! protocol is implemented here, the type is only `Send + Sync` so a
//! replication layer can wrap it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::Mutex;

/// Unique transaction identifier
pub type TxnId = u64;

/// Terminal outcome of a transaction, reported to `finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    Committed,
    RolledBack,
    /// Forced abort: the transaction exceeded the per-node touched-key bound
    TooLarge,
}

// ============================================================================
// Snapshot Token
// ============================================================================

/// A point-in-time snapshot handed to a transaction at begin
///
/// Captures the commit-order high mark (`read_order`) plus the set of
/// transactions that were still active at begin, whose writes must stay
/// invisible to this reader even if they commit later.
#[derive(Debug, Clone)]
pub struct SnapshotToken {
    /// The transaction this snapshot belongs to
    pub txn_id: TxnId,
    /// Highest commit order visible to this snapshot
    pub read_order: u64,
    /// Transactions active when the snapshot was taken
    pub active: Arc<AHashSet<TxnId>>,
}

impl SnapshotToken {
    /// Check whether a committed version is visible to this snapshot
    #[inline]
    pub fn sees(&self, commit_order: u64, created_by: TxnId) -> bool {
        commit_order <= self.read_order && !self.active.contains(&created_by)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Per-transaction record kept while the transaction is active
struct ActiveEntry {
    read_order: u64,
}

/// Sequencer state updated as one atomic unit
struct SequencerState {
    next_txn_id: TxnId,
    /// Last allocated commit order (high mark)
    commit_order: u64,
    /// Active transactions: txn_id → record
    active: BTreeMap<TxnId, ActiveEntry>,
}

/// Central MVCC coordinator
///
/// All mutations of the counters and the active set happen under a single
/// mutex; the critical sections are a counter bump plus a map update.
/// The watermark is mirrored into an atomic so the eviction path can read
/// it without taking the lock.
pub struct Coordinator {
    state: Mutex<SequencerState>,
    /// Cached `oldest_active_watermark` (optimization)
    watermark: AtomicU64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SequencerState {
                next_txn_id: 1,
                commit_order: 0,
                active: BTreeMap::new(),
            }),
            watermark: AtomicU64::new(0),
        }
    }

    /// BEGIN - allocate a transaction id and capture its snapshot
    pub fn begin(&self) -> SnapshotToken {
        let mut state = self.state.lock();
        let txn_id = state.next_txn_id;
        state.next_txn_id += 1;

        let read_order = state.commit_order;
        let active: AHashSet<TxnId> = state.active.keys().copied().collect();

        state.active.insert(txn_id, ActiveEntry { read_order });
        self.store_watermark(&state);

        SnapshotToken {
            txn_id,
            read_order,
            active: Arc::new(active),
        }
    }

    /// Allocate the commit order for a transaction entering its commit phase
    ///
    /// Orders are strictly increasing across all transactions. An order
    /// allocated to a transaction that later fails validation is simply
    /// never attached to a version.
    pub fn prepare_commit(&self, _txn: TxnId) -> u64 {
        let mut state = self.state.lock();
        state.commit_order += 1;
        let order = state.commit_order;
        self.store_watermark(&state);
        order
    }

    /// Remove a transaction from the active set with its terminal outcome
    pub fn finish(&self, txn: TxnId, outcome: TxnOutcome) {
        let mut state = self.state.lock();
        if state.active.remove(&txn).is_some() && outcome == TxnOutcome::TooLarge {
            log::warn!("txn {} forcibly finished: too large", txn);
        }
        self.store_watermark(&state);
    }

    /// Minimum snapshot read order among active transactions, or the commit
    /// high mark when no transaction is active
    ///
    /// Everything committed strictly below this order and shadowed by a
    /// newer committed version is unreachable by any active or future
    /// snapshot, which makes it the pruning horizon.
    pub fn oldest_active_watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Number of active transactions
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Whether any transaction is currently active
    pub fn has_active(&self) -> bool {
        self.active_count() > 0
    }

    /// Whether a specific transaction is still active
    pub fn is_active(&self, txn: TxnId) -> bool {
        self.state.lock().active.contains_key(&txn)
    }

    fn store_watermark(&self, state: &SequencerState) {
        let mark = state
            .active
            .values()
            .map(|e| e.read_order)
            .min()
            .unwrap_or(state.commit_order);
        self.watermark.store(mark, Ordering::SeqCst);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_allocates_increasing_ids() {
        let c = Coordinator::new();
        let s1 = c.begin();
        let s2 = c.begin();
        assert!(s2.txn_id > s1.txn_id);
        assert_eq!(c.active_count(), 2);
    }

    #[test]
    fn test_snapshot_excludes_concurrent_txn() {
        let c = Coordinator::new();
        let s1 = c.begin();
        let s2 = c.begin();
        // s2 was taken while s1 was active
        assert!(s2.active.contains(&s1.txn_id));
        // s1 predates s2
        assert!(!s1.active.contains(&s2.txn_id));
    }

    #[test]
    fn test_commit_orders_strictly_increase() {
        let c = Coordinator::new();
        let s1 = c.begin();
        let s2 = c.begin();
        let o1 = c.prepare_commit(s1.txn_id);
        let o2 = c.prepare_commit(s2.txn_id);
        assert!(o2 > o1);
    }

    #[test]
    fn test_watermark_tracks_oldest_active() {
        let c = Coordinator::new();
        // Idle: watermark equals the high mark
        assert_eq!(c.oldest_active_watermark(), 0);

        let s1 = c.begin();
        let s2 = c.begin();
        assert_eq!(c.oldest_active_watermark(), s1.read_order);

        // Bump the high mark while both are active: watermark pinned by s1
        let _ = c.prepare_commit(s2.txn_id);
        assert_eq!(c.oldest_active_watermark(), s1.read_order);

        c.finish(s1.txn_id, TxnOutcome::Committed);
        assert_eq!(c.oldest_active_watermark(), s2.read_order);

        c.finish(s2.txn_id, TxnOutcome::RolledBack);
        // Idle again: back to the high mark
        assert_eq!(c.oldest_active_watermark(), 1);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let c = Coordinator::new();
        let s = c.begin();
        c.finish(s.txn_id, TxnOutcome::RolledBack);
        c.finish(s.txn_id, TxnOutcome::RolledBack);
        assert_eq!(c.active_count(), 0);
    }

    #[test]
    fn test_visibility_rule() {
        let c = Coordinator::new();
        let s1 = c.begin();
        let s2 = c.begin();
        let o = c.prepare_commit(s2.txn_id);
        c.finish(s2.txn_id, TxnOutcome::Committed);

        // s1's snapshot predates s2's commit
        assert!(!s1.sees(o, s2.txn_id));

        let s3 = c.begin();
        assert!(s3.sees(o, s2.txn_id));
    }
}
