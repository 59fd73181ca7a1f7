//! Query surface consumed by the external SQL engine
//!
//! The engine plans and optimizes elsewhere; what it needs from the store
//! is a snapshot-consistent range scan with pushed-down predicate and
//! projection.

pub mod scan;

pub use scan::{Row, Scan};
