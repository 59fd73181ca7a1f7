//! Read-Only Entry View - entry wrapper handed to eviction and iteration
//!
//! A non-owning cursor over one key's version chain. It never obscures an
//! obsolete entry: a view held across a concurrent eviction keeps
//! answering `version()` from the order recorded at eviction time, and
//! peeks simply return nothing. All mutating operations fail with
//! `UnsupportedDuringEviction`.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::cache::eviction::EvictionManager;
use crate::mvcc::coordinator::SnapshotToken;
use crate::mvcc::version_store::ChainHandle;
use crate::store::GridStore;
use crate::{GridError, GridResult};

use super::Affinity;

// ============================================================================
// Peek Modes
// ============================================================================

/// Where a peek looks for a value, in the order the modes are listed
///
/// An empty mode list means `[Smart]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeekMode {
    /// Transaction-local first, then committed
    #[default]
    Smart,
    /// Only the calling transaction's own pending write
    TransactionOnly,
    /// Only the newest committed value
    CommittedOnly,
    /// Near-cache copy; this store keeps none, so the mode yields nothing
    Near,
}

// ============================================================================
// Entry View
// ============================================================================

/// Read-only cursor over a single entry
///
/// Equality and hashing are defined by key plus owning-store identity, not
/// by any captured value, so a view stays a valid map key while the
/// underlying entry mutates.
pub struct EntryView {
    key: Bytes,
    chain: ChainHandle,
    eviction: Arc<EvictionManager>,
    affinity: Arc<dyn Affinity>,
    store_id: u64,
}

impl EntryView {
    pub(crate) fn new(
        key: Bytes,
        chain: ChainHandle,
        eviction: Arc<EvictionManager>,
        affinity: Arc<dyn Affinity>,
        store_id: u64,
    ) -> Self {
        Self {
            key,
            chain,
            eviction,
            affinity,
            store_id,
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Best-effort visible value without a started-transaction requirement
    ///
    /// Modes are polled in the listed order; the first hit wins. A view
    /// over a concurrently removed entry peeks as absent rather than
    /// failing.
    pub fn peek(&self, modes: &[PeekMode], tx: Option<&SnapshotToken>) -> Option<Bytes> {
        if modes.is_empty() {
            return self.peek_mode(PeekMode::Smart, tx);
        }
        modes.iter().find_map(|&mode| self.peek_mode(mode, tx))
    }

    /// Peek constrained by an entry filter, applied to the candidate value
    pub fn peek_filtered<F>(
        &self,
        modes: &[PeekMode],
        tx: Option<&SnapshotToken>,
        filter: F,
    ) -> Option<Bytes>
    where
        F: Fn(&Bytes) -> bool,
    {
        self.peek(modes, tx).filter(|v| filter(v))
    }

    fn peek_mode(&self, mode: PeekMode, tx: Option<&SnapshotToken>) -> Option<Bytes> {
        let chain = self.chain.read();
        if chain.is_obsolete() {
            return None;
        }

        let tx_local = || {
            tx.and_then(|t| {
                chain
                    .pending()
                    .filter(|v| v.created_by == t.txn_id)
                    .and_then(|v| v.value.clone())
            })
        };
        let committed = || {
            chain
                .newest_committed()
                .filter(|v| !v.is_expired(Instant::now()))
                .and_then(|v| v.value.clone())
        };

        match mode {
            PeekMode::Smart => tx_local().or_else(committed),
            PeekMode::TransactionOnly => tx_local(),
            PeekMode::CommittedOnly => committed(),
            PeekMode::Near => None,
        }
    }

    /// Newest committed order; falls back to the order recorded when the
    /// entry was evicted
    pub fn version(&self) -> u64 {
        let chain = self.chain.read();
        if chain.is_obsolete() {
            return chain.evicted_order();
        }
        chain
            .newest_committed()
            .and_then(|v| v.commit_order)
            .unwrap_or(0)
    }

    /// Expiry deadline of the newest committed version, if a TTL applies
    pub fn expiration_time(&self) -> Option<Instant> {
        self.chain.read().newest_committed().and_then(|v| v.expires_at)
    }

    /// Whether this node is the key's primary owner
    pub fn is_primary(&self) -> bool {
        self.affinity.is_primary(&self.key)
    }

    /// Whether this node holds a backup copy of the key
    pub fn is_backup(&self) -> bool {
        self.affinity.is_backup(&self.key)
    }

    /// The key's partition
    pub fn partition(&self) -> u32 {
        self.affinity.partition(&self.key)
    }

    /// Attempt to evict the underlying entry
    pub fn evict(&self) -> bool {
        self.eviction.evict(&self.key)
    }

    // ========================================================================
    // Mutating surface - always refused on this view
    // ========================================================================

    pub fn set(&self, _value: Bytes) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("set"))
    }

    pub fn replace(&self, _value: Bytes) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("replace"))
    }

    pub fn remove(&self) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("remove"))
    }

    pub fn lock(&self) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("lock"))
    }

    pub fn unlock(&self) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("unlock"))
    }

    pub fn reload(&self) -> GridResult<()> {
        Err(GridError::UnsupportedDuringEviction("reload"))
    }
}

impl PartialEq for EntryView {
    fn eq(&self, other: &Self) -> bool {
        self.store_id == other.store_id && self.key == other.key
    }
}

impl Eq for EntryView {}

impl Hash for EntryView {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store_id.hash(state);
        self.key.hash(state);
    }
}

impl std::fmt::Debug for EntryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryView")
            .field("key", &self.key)
            .field("store_id", &self.store_id)
            .field("version", &self.version())
            .finish()
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Encode an entry view for transport: the key, resolved again on decode
pub fn encode_entry(view: &EntryView) -> Bytes {
    view.key.clone()
}

/// Decode an entry view against an explicit store handle
///
/// Returns None when the key no longer has an entry in that store.
pub fn decode_entry(bytes: Bytes, store: &GridStore) -> Option<EntryView> {
    store.entry(bytes)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::store::GridStore;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn store_with_value(k: &str, v: &str) -> GridStore {
        let store = GridStore::new(GridConfig::default());
        let t = store.begin();
        store.put(t.txn_id, key(k), key(v)).unwrap();
        store.commit(t.txn_id).unwrap();
        store
    }

    #[test]
    fn test_peek_committed() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();

        assert_eq!(view.peek(&[], None), Some(key("v")));
        assert_eq!(view.peek(&[PeekMode::CommittedOnly], None), Some(key("v")));
        assert_eq!(view.peek(&[PeekMode::TransactionOnly], None), None);
        assert_eq!(view.peek(&[PeekMode::Near], None), None);
        // Fallback chain: Near misses, CommittedOnly answers
        assert_eq!(
            view.peek(&[PeekMode::Near, PeekMode::CommittedOnly], None),
            Some(key("v"))
        );
    }

    #[test]
    fn test_peek_transaction_local() {
        let store = store_with_value("k", "v");
        let t = store.begin();
        store.put(t.txn_id, key("k"), key("wip")).unwrap();

        let view = store.entry(key("k")).unwrap();
        assert_eq!(
            view.peek(&[PeekMode::TransactionOnly], Some(&t)),
            Some(key("wip"))
        );
        // Smart prefers the transaction-local value
        assert_eq!(view.peek(&[], Some(&t)), Some(key("wip")));
        // Other callers still see the committed value
        assert_eq!(view.peek(&[], None), Some(key("v")));
        store.rollback(t.txn_id);
    }

    #[test]
    fn test_peek_filtered() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();
        assert_eq!(view.peek_filtered(&[], None, |v| v == &key("v")), Some(key("v")));
        assert_eq!(view.peek_filtered(&[], None, |v| v == &key("x")), None);
    }

    #[test]
    fn test_mutators_always_refused() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();

        for result in [
            view.set(key("x")),
            view.replace(key("x")),
            view.remove(),
            view.lock(),
            view.unlock(),
            view.reload(),
        ] {
            assert!(matches!(
                result.unwrap_err(),
                GridError::UnsupportedDuringEviction(_)
            ));
        }
        // The entry is untouched
        assert_eq!(view.peek(&[], None), Some(key("v")));
    }

    #[test]
    fn test_view_survives_eviction() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();
        let version_before = view.version();

        assert!(view.evict());
        // Obsolete entry: peek is absent, version answers from the record
        assert_eq!(view.peek(&[], None), None);
        assert_eq!(view.version(), version_before);
    }

    #[test]
    fn test_equality_by_key_and_store() {
        let store = store_with_value("k", "v");
        let v1 = store.entry(key("k")).unwrap();
        let v2 = store.entry(key("k")).unwrap();
        assert_eq!(v1, v2);

        let other_store = store_with_value("k", "v");
        let v3 = other_store.entry(key("k")).unwrap();
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_codec_roundtrip() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();

        let encoded = encode_entry(&view);
        let decoded = decode_entry(encoded, &store).unwrap();
        assert_eq!(view, decoded);
        assert_eq!(decoded.peek(&[], None), Some(key("v")));

        assert!(decode_entry(key("missing"), &store).is_none());
    }

    #[test]
    fn test_partition_ownership() {
        let store = store_with_value("k", "v");
        let view = store.entry(key("k")).unwrap();
        assert!(view.is_primary());
        assert!(!view.is_backup());
    }
}
