//! GridBase Core Storage Engine
//!
//! A transactional in-memory key/value store with per-entry multiversion
//! concurrency control. Transactions read through point-in-time snapshots,
//! writes are validated at commit time (first-committer-wins), and a
//! policy-driven eviction layer reclaims versions and cold entries without
//! ever breaking the view of an active snapshot.

pub mod cache;
pub mod config;
pub mod entry;
pub mod mvcc;
pub mod query;
pub mod store;
pub mod txn;

// Re-export main types
pub use cache::{EvictionManager, PruneStats};
pub use config::GridConfig;
pub use entry::{Affinity, EntryView, LocalAffinity, PeekMode};
pub use mvcc::{Coordinator, SnapshotToken, VersionStore};
pub use query::{Row, Scan};
pub use store::{GridStore, StoreStats};
pub use txn::{TxnId, TxnManager, TxnState};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Write conflict: key is pending in another transaction")]
    WriteConflict,

    #[error("Serialization conflict: key was committed by txn {conflicting_txn} after this snapshot")]
    SerializationConflict { conflicting_txn: TxnId },

    #[error("Transaction too large: touched more than {limit} keys")]
    TransactionTooLarge { limit: usize },

    #[error("Operation '{0}' is not supported on an eviction view")]
    UnsupportedDuringEviction(&'static str),

    #[error("Entry was concurrently removed")]
    EntryRemoved,

    #[error("Transaction {0} not found")]
    TxnNotFound(TxnId),

    #[error("Transaction {0} is not active")]
    TxnNotActive(TxnId),
}

/// Convenience alias used throughout the crate
pub type GridResult<T> = Result<T, GridError>;
