//! Eviction subsystem - policy-driven reclamation of versions and entries
//!
//! Two reclamation paths:
//! - `prune_all`: background sweep removing committed versions shadowed at
//!   the coordinator's oldest-watermark horizon
//! - `evict` / `enforce_capacity`: whole-entry removal ranked by an LRU
//!   policy, refused whenever an active snapshot could still observe the
//!   entry or a writer holds its pending slot

pub mod eviction;
pub mod lru;

pub use eviction::{EvictionManager, PruneStats};
pub use lru::LruPolicy;
