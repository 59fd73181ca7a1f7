//! Transaction Context - Per-transaction state tracking
//!
//! Holds the snapshot token, the touched keys with their intended writes,
//! and the transaction's position in its lifecycle state machine.

use ahash::AHashMap;
use bytes::Bytes;

use crate::mvcc::coordinator::{SnapshotToken, TxnId};
use crate::{GridError, GridResult};

// ============================================================================
// Transaction State
// ============================================================================

/// Lifecycle state machine: `Active -> Committing -> Committed | RolledBack`,
/// with a direct `Active -> RolledBack` edge. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committing,
    Committed,
    RolledBack,
}

impl TxnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::RolledBack)
    }
}

// ============================================================================
// Transaction Context
// ============================================================================

/// Per-transaction context
///
/// Writes are keyed by touched key (`None` = tombstone); the first-touch
/// order is kept separately so commit application is deterministic.
pub struct TxnContext {
    snapshot: SnapshotToken,
    writes: AHashMap<Bytes, Option<Bytes>>,
    touch_order: Vec<Bytes>,
    state: TxnState,
    /// Set on conflict or forced abort: the transaction may only roll back
    rollback_only: bool,
    /// Touched-key cap; exceeding it aborts the transaction
    max_keys: usize,
}

impl TxnContext {
    pub fn new(snapshot: SnapshotToken, max_keys: usize) -> Self {
        Self {
            snapshot,
            writes: AHashMap::new(),
            touch_order: Vec::new(),
            state: TxnState::Active,
            rollback_only: false,
            max_keys,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.snapshot.txn_id
    }

    pub fn snapshot(&self) -> &SnapshotToken {
        &self.snapshot
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    // ========================================================================
    // Write buffering
    // ========================================================================

    /// Whether buffering a write to `key` would exceed the touched-key cap
    pub fn would_exceed_cap(&self, key: &Bytes) -> bool {
        !self.writes.contains_key(key) && self.writes.len() >= self.max_keys
    }

    /// Record an intended write (value or tombstone) for `key`
    pub fn record_write(&mut self, key: Bytes, value: Option<Bytes>) -> GridResult<()> {
        if self.state != TxnState::Active || self.rollback_only {
            return Err(GridError::TxnNotActive(self.txn_id()));
        }
        if self.would_exceed_cap(&key) {
            self.rollback_only = true;
            return Err(GridError::TransactionTooLarge {
                limit: self.max_keys,
            });
        }
        if !self.writes.contains_key(&key) {
            self.touch_order.push(key.clone());
        }
        self.writes.insert(key, value);
        Ok(())
    }

    /// Touched keys in first-touch order
    pub fn touched_keys(&self) -> &[Bytes] {
        &self.touch_order
    }

    /// The intended write for `key`, if this transaction touched it
    pub fn write_for(&self, key: &Bytes) -> Option<&Option<Bytes>> {
        self.writes.get(key)
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// `Active -> Committing`; refused for rollback-only or non-active txns
    pub fn begin_commit(&mut self) -> GridResult<()> {
        if self.state != TxnState::Active || self.rollback_only {
            return Err(GridError::TxnNotActive(self.txn_id()));
        }
        self.state = TxnState::Committing;
        Ok(())
    }

    /// `Committing -> Committed`
    pub fn mark_committed(&mut self) {
        debug_assert_eq!(self.state, TxnState::Committing);
        self.state = TxnState::Committed;
    }

    /// Any non-terminal state `-> RolledBack`; the transaction becomes
    /// rollback-only for the rest of its (aborted) lifetime
    pub fn mark_rolled_back(&mut self) {
        if !self.state.is_terminal() {
            self.state = TxnState::RolledBack;
        }
        self.rollback_only = true;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;
    use std::sync::Arc;

    fn ctx(max_keys: usize) -> TxnContext {
        TxnContext::new(
            SnapshotToken {
                txn_id: 1,
                read_order: 0,
                active: Arc::new(AHashSet::new()),
            },
            max_keys,
        )
    }

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_write_buffering_keeps_touch_order() {
        let mut c = ctx(16);
        c.record_write(key("b"), Some(key("1"))).unwrap();
        c.record_write(key("a"), None).unwrap();
        c.record_write(key("b"), Some(key("2"))).unwrap();

        assert_eq!(c.write_count(), 2);
        assert_eq!(c.touched_keys(), &[key("b"), key("a")]);
        assert_eq!(c.write_for(&key("b")), Some(&Some(key("2"))));
        assert_eq!(c.write_for(&key("a")), Some(&None));
    }

    #[test]
    fn test_touched_key_cap() {
        let mut c = ctx(2);
        c.record_write(key("a"), None).unwrap();
        c.record_write(key("b"), None).unwrap();
        // Re-touching a known key is fine at the cap
        c.record_write(key("a"), Some(key("x"))).unwrap();

        let err = c.record_write(key("c"), None).unwrap_err();
        assert!(matches!(err, GridError::TransactionTooLarge { limit: 2 }));
        assert!(c.is_rollback_only());
        // Once rollback-only, even known keys are refused
        assert!(c.record_write(key("a"), None).is_err());
    }

    #[test]
    fn test_state_machine() {
        let mut c = ctx(16);
        assert_eq!(c.state(), TxnState::Active);

        c.begin_commit().unwrap();
        assert_eq!(c.state(), TxnState::Committing);
        assert!(c.record_write(key("a"), None).is_err());

        c.mark_committed();
        assert_eq!(c.state(), TxnState::Committed);
        assert!(c.state().is_terminal());
    }

    #[test]
    fn test_rollback_only_blocks_commit() {
        let mut c = ctx(16);
        c.mark_rolled_back();
        assert_eq!(c.state(), TxnState::RolledBack);
        assert!(c.begin_commit().is_err());

        // Terminal state survives repeated rollback
        c.mark_rolled_back();
        assert_eq!(c.state(), TxnState::RolledBack);
    }
}
