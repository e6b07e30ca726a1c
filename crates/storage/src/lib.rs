//! Reference ordered key-value store for Tessera
//!
//! The table engine is specified against an ordered store boundary:
//! ordered maps with multi-version read snapshots and an atomic
//! conditional-write primitive. This crate is the in-process
//! implementation of that boundary - `BTreeMap` under `parking_lot`
//! locks, clone-based snapshots, and a database-wide commit lock that
//! makes conditional batches all-or-nothing.

pub mod entry;
pub mod env;
pub mod snapshot;
pub mod store;
pub mod write;

pub use entry::Entry;
pub use env::{CommitReceipt, CommitResult, ConflictInfo, Env, AUDIT_STORE};
pub use snapshot::StoreSnapshot;
pub use store::Store;
pub use write::{AuditSpec, Expected, StagedWrite, WriteOp};
