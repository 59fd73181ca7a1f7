//! Runtime configuration for the store
//!
//! Supplied by the surrounding cache layer; every knob has a default that
//! matches a mid-sized node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of entries before capacity eviction kicks in
const DEFAULT_MAX_ENTRIES: usize = 1_000_000;

/// Default bound on keys a single transaction may touch
const DEFAULT_MAX_KEYS_PER_TXN: usize = 65_536;

/// Default interval between background prune sweeps (in seconds)
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 60;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Time-to-live applied to committed values (None = no expiry)
    pub ttl: Option<Duration>,
    /// Entry count above which capacity eviction runs
    pub max_entries: usize,
    /// Hard cap on distinct keys per transaction; exceeding it aborts
    /// the transaction with `TransactionTooLarge`
    pub max_keys_per_txn: usize,
    /// Minimum interval between background prune sweeps
    pub prune_interval: Duration,
    /// Whether capacity eviction is enabled
    pub eviction_enabled: bool,
    /// Partition count used for key-to-partition classification
    pub partitions: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_keys_per_txn: DEFAULT_MAX_KEYS_PER_TXN,
            prune_interval: Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS),
            eviction_enabled: true,
            partitions: 1024,
        }
    }
}
