//! Snapshot range scan - lazy, single-pass row sequence
//!
//! Chain handles for the range are captured eagerly (a brief outer read
//! lock), then rows materialize lazily against the fixed snapshot. Writers
//! committing mid-scan are invisible: visibility is decided per entry by
//! the snapshot captured at scan start.

use std::ops::Bound;
use std::time::Instant;

use bytes::Bytes;

use crate::mvcc::coordinator::SnapshotToken;
use crate::mvcc::version_store::{ChainHandle, VersionStore};

/// One projected row produced by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Bytes,
    pub value: Bytes,
}

/// Row-level predicate pushed down by the query engine
pub type Predicate = Box<dyn Fn(&Bytes, &Bytes) -> bool + Send>;

/// Row projection pushed down by the query engine
pub type Projection = Box<dyn Fn(&Bytes, &Bytes) -> Row + Send>;

/// Lazy snapshot-filtered scan over a key range
pub struct Scan {
    snapshot: SnapshotToken,
    entries: std::vec::IntoIter<(Bytes, ChainHandle)>,
    predicate: Option<Predicate>,
    projection: Option<Projection>,
    /// Expiry is evaluated against the scan's start, keeping the pass
    /// self-consistent
    started: Instant,
}

impl Scan {
    pub fn new(
        store: &VersionStore,
        snapshot: SnapshotToken,
        lower: Bound<Bytes>,
        upper: Bound<Bytes>,
        predicate: Option<Predicate>,
        projection: Option<Projection>,
    ) -> Self {
        Self {
            snapshot,
            entries: store.range_handles(lower, upper).into_iter(),
            predicate,
            projection,
            started: Instant::now(),
        }
    }
}

impl Iterator for Scan {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let (key, chain) = self.entries.next()?;
            let value = {
                let chain = chain.read();
                if chain.is_obsolete() {
                    continue;
                }
                chain.read(&self.snapshot, self.started)
            };
            let Some(value) = value else { continue };

            if let Some(pred) = &self.predicate {
                if !pred(&key, &value) {
                    continue;
                }
            }

            return Some(match &self.projection {
                Some(project) => project(&key, &value),
                None => Row { key, value },
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
