//! Staged writes
//!
//! A `StagedWrite` is one pending mutation: target store, key, operation,
//! an optional version expectation for optimistic conditioning, and an
//! optional audit spec. Batches of staged writes are submitted to
//! `Env::commit_conditional` / `Env::commit_exclusive` as one atomic unit.

use crate::store::Store;
use std::sync::Arc;
use tessera_core::{Availability, AuditOperation, StoreKey, TableId, Value, Version};

/// The mutation a staged write performs
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace the entry
    Put {
        /// New value
        value: Value,
        /// Availability marker to store with it
        availability: Availability,
    },
    /// Remove the entry
    Remove,
    /// Publish a message: nothing is written to the target store, but the
    /// commit appends an audit entry carrying the payload
    Message {
        /// Published payload
        payload: Value,
    },
    /// Validate the version expectation only; nothing is written
    Check,
}

/// Version expectation checked at commit time
///
/// Staged-write expectations come from the version read when the write was
/// staged; `Absent` means the key must still not exist. A write with no
/// expectation applies unconditionally - the table layer only stages
/// message writes and derived index writes that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist
    Absent,
    /// The key's stored version must equal this
    At(Version),
}

impl Expected {
    /// Expectation matching an observed version, or absence
    pub fn from_observed(observed: Option<Version>) -> Self {
        match observed {
            Some(version) => Expected::At(version),
            None => Expected::Absent,
        }
    }
}

/// Audit metadata attached to a staged write
#[derive(Debug, Clone)]
pub struct AuditSpec {
    /// Table the write belongs to
    pub table_id: TableId,
    /// Operation kind recorded in the log
    pub operation: AuditOperation,
    /// Caller identity, when supplied
    pub actor: Option<String>,
    /// Whether the write marks the record invalidated
    pub invalidated: bool,
}

/// One pending mutation in a transaction batch
#[derive(Debug, Clone)]
pub struct StagedWrite {
    /// Target store
    pub store: Arc<Store>,
    /// Target key
    pub key: StoreKey,
    /// The mutation
    pub op: WriteOp,
    /// Optimistic version expectation, if any
    pub expected: Option<Expected>,
    /// Audit spec; writes without one leave no log entry
    pub audit: Option<AuditSpec>,
}

impl StagedWrite {
    /// Stage a put with default availability
    pub fn put(store: Arc<Store>, key: StoreKey, value: Value) -> Self {
        Self {
            store,
            key,
            op: WriteOp::Put {
                value,
                availability: Availability::Cached,
            },
            expected: None,
            audit: None,
        }
    }

    /// Stage a removal
    pub fn remove(store: Arc<Store>, key: StoreKey) -> Self {
        Self {
            store,
            key,
            op: WriteOp::Remove,
            expected: None,
            audit: None,
        }
    }

    /// Stage a message publication
    pub fn message(store: Arc<Store>, key: StoreKey, payload: Value) -> Self {
        Self {
            store,
            key,
            op: WriteOp::Message { payload },
            expected: None,
            audit: None,
        }
    }

    /// Stage a bare version check
    ///
    /// Combined with `expecting`, this makes the whole batch conditional
    /// on an entry the batch never touches. Index backfill guards each
    /// record's entries on the primary version the scan observed this way.
    pub fn check(store: Arc<Store>, key: StoreKey) -> Self {
        Self {
            store,
            key,
            op: WriteOp::Check,
            expected: None,
            audit: None,
        }
    }

    /// Set the availability marker on a put
    pub fn availability(mut self, availability: Availability) -> Self {
        if let WriteOp::Put {
            availability: slot, ..
        } = &mut self.op
        {
            *slot = availability;
        }
        self
    }

    /// Attach a version expectation
    pub fn expecting(mut self, expected: Expected) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Attach an audit spec
    pub fn audited(mut self, audit: AuditSpec) -> Self {
        self.audit = Some(audit);
        self
    }
}
