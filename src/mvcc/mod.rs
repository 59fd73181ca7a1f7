//! MVCC (Multi-Version Concurrency Control) subsystem
//!
//! Enables concurrent reads and writes without blocking:
//! - Readers see a consistent snapshot taken at transaction start
//! - Writers stage a pending version without disturbing readers
//! - Pruning removes versions no snapshot can reach
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              VersionStore                         │
//! │  - One version chain per key, newest first       │
//! │  - At most one pending (uncommitted) version     │
//! ├──────────────────────────────────────────────────┤
//! │  Coordinator                                     │
//! │  - Issues txn ids, snapshots and commit orders   │
//! │  - Tracks the active transaction set             │
//! │  - Answers the oldest-watermark query            │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod coordinator;
pub mod version_store;

pub use coordinator::{Coordinator, SnapshotToken, TxnId, TxnOutcome};
pub use version_store::{Version, VersionChain, VersionStore};
