//! Transaction layer - snapshot-isolated transactions over the version store
//!
//! Provides BEGIN / COMMIT / ROLLBACK semantics with commit-time validation
//! (first-committer-wins under snapshot isolation).
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              TxnManager                           │
//! │  - Tracks active transaction contexts            │
//! │  - Drives the commit/rollback protocol           │
//! ├──────────────────────────────────────────────────┤
//! │  TxnContext                                      │
//! │  - Per-transaction state machine                 │
//! │  - Touched keys and intended writes              │
//! ├──────────────────────────────────────────────────┤
//! │  ConflictDetector                                │
//! │  - Commit-time serialization check per key       │
//! │  - First-committer-wins strategy                 │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod conflict;
pub mod context;
pub mod manager;

pub use crate::mvcc::coordinator::TxnId;
pub use conflict::ConflictDetector;
pub use context::{TxnContext, TxnState};
pub use manager::TxnManager;
