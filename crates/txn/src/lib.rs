//! Transaction layer for Tessera
//!
//! Builds the commit protocol on top of the storage boundary:
//!
//! - `Transaction`: a reusable in-memory batch of staged writes with
//!   lazy per-store read snapshots
//! - an optimistic commit loop that retries version-check conflicts
//!   transparently and escalates to an exclusive commit for large or
//!   repeatedly conflicting batches; staging steps re-run on every
//!   attempt so derived writes never go out stale
//! - `WritableRecord`: a copy-on-write overlay over a frozen record,
//!   folded into the batch by a staging step

pub mod transaction;
pub mod writable;

pub use transaction::{
    CommitOutcome, Transaction, WriteStager, BASE_OPTIMISTIC_THRESHOLD, MAX_OPTIMISTIC_RETRIES,
};
pub use writable::WritableRecord;
