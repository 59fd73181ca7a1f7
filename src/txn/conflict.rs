//! Conflict Detector - commit-time serialization validation
//!
//! First-committer-wins under snapshot isolation: a transaction whose
//! snapshot predates a committed write to one of its touched keys is
//! rejected at commit, without readers ever blocking writers.

use crate::mvcc::version_store::VersionStore;
use crate::{GridError, GridResult};

use super::context::TxnContext;

/// Commit-time conflict detector
///
/// Stateless: the version chains themselves carry the committed history, so
/// validation is a per-key probe instead of a side log of committed writes.
/// Because a committing transaction holds each touched chain's pending slot,
/// every conflicting commit necessarily landed before the slot was acquired
/// and is therefore visible to the probe.
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Validate `ctx` against the store
    ///
    /// Fails with `SerializationConflict` if any touched key carries a
    /// committed version, created by another transaction, with commit order
    /// above the transaction's snapshot read order.
    pub fn validate(&self, ctx: &TxnContext, store: &VersionStore) -> GridResult<()> {
        let read_order = ctx.snapshot().read_order;
        let me = ctx.txn_id();

        for key in ctx.touched_keys() {
            if let Some((conflicting_txn, _order)) = store.committed_after(key, read_order, me) {
                return Err(GridError::SerializationConflict { conflicting_txn });
            }
        }
        Ok(())
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
