//! Database environment: named stores, commit lock, audit log, clock
//!
//! `Env` is the conditional-write boundary the commit protocol builds on.
//! It owns every named store of one database, the monotonic clock that
//! stamps commits, the append-only audit store, and the commit lock that
//! makes a batch of writes atomic across stores.
//!
//! Two commit paths:
//!
//! - `commit_conditional`: validate every staged expectation under the
//!   commit lock; if any fails, apply *nothing* and report the freshest
//!   observed versions so the caller can re-stage and retry
//! - `commit_exclusive`: the serializing escalation path - expectations
//!   are ignored and the batch always applies
//!
//! Both assign a single commit version to every write in the batch, so a
//! transaction's writes carry one `txn_time`.

use crate::entry::Entry;
use crate::snapshot::StoreSnapshot;
use crate::store::Store;
use crate::write::{Expected, StagedWrite, WriteOp};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tessera_core::{AuditEntry, LogicalClock, Result, StoreKey, Value, Version};
use tracing::{debug, trace};

/// Name of the per-database audit store
pub const AUDIT_STORE: &str = "__audit";

/// Result of a conditional commit attempt
#[derive(Debug)]
pub enum CommitResult {
    /// Every expectation held; the batch applied atomically
    Committed(CommitReceipt),
    /// At least one expectation failed; nothing applied
    Conflict(Vec<ConflictInfo>),
}

/// A successfully applied batch
#[derive(Debug)]
pub struct CommitReceipt {
    /// Commit version shared by every write in the batch
    pub version: Version,
    /// Audit entries appended by this commit, in batch order
    pub audit: Vec<AuditEntry>,
}

/// One failed expectation within a conflicted batch
#[derive(Debug, Clone, Copy)]
pub struct ConflictInfo {
    /// Index of the conflicted write within the submitted batch
    pub index: usize,
    /// The version actually stored at commit time (`None` = absent)
    pub current: Option<Version>,
}

/// One database's storage environment
#[derive(Debug)]
pub struct Env {
    stores: DashMap<String, Arc<Store>>,
    audit: Arc<Store>,
    clock: LogicalClock,
    // Writers exclusive, readers shared: snapshot creation and direct reads
    // take the shared side so they never observe a half-applied batch.
    commit_lock: RwLock<()>,
}

impl Env {
    /// Create an empty environment
    pub fn new() -> Self {
        let audit = Arc::new(Store::new(AUDIT_STORE));
        let stores = DashMap::new();
        stores.insert(AUDIT_STORE.to_string(), Arc::clone(&audit));
        Self {
            stores,
            audit,
            clock: LogicalClock::new(),
            commit_lock: RwLock::new(()),
        }
    }

    /// Open a named store, creating it if absent
    pub fn store(&self, name: &str) -> Arc<Store> {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Store::new(name)))
            .clone()
    }

    /// Whether a named store exists
    pub fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Remove a named store and all of its entries (table drop)
    pub fn remove_store(&self, name: &str) {
        self.stores.remove(name);
    }

    /// The append-only audit store
    pub fn audit_store(&self) -> Arc<Store> {
        Arc::clone(&self.audit)
    }

    /// The commit clock
    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// Take a consistent snapshot of one store
    ///
    /// Holding the shared side of the commit lock while cloning guarantees
    /// the snapshot never splits a committed batch.
    pub fn snapshot(&self, store: &Store) -> StoreSnapshot {
        let _read = self.commit_lock.read();
        store.snapshot()
    }

    /// Atomically apply a batch if every version expectation holds
    ///
    /// All-or-nothing: one failed expectation rejects the entire batch and
    /// reports the freshest observed version per conflicted write.
    pub fn commit_conditional(&self, writes: &[StagedWrite]) -> Result<CommitResult> {
        let _guard = self.commit_lock.write();

        let mut conflicts = Vec::new();
        for (index, write) in writes.iter().enumerate() {
            if let Some(expected) = write.expected {
                let current = write.store.current_version(&write.key);
                let holds = match expected {
                    Expected::Absent => current.is_none(),
                    Expected::At(version) => current == Some(version),
                };
                if !holds {
                    conflicts.push(ConflictInfo { index, current });
                }
            }
        }
        if !conflicts.is_empty() {
            debug!(
                writes = writes.len(),
                conflicts = conflicts.len(),
                "conditional commit rejected"
            );
            return Ok(CommitResult::Conflict(conflicts));
        }

        Ok(CommitResult::Committed(self.apply(writes)))
    }

    /// Apply a batch unconditionally inside the serializing transaction
    pub fn commit_exclusive(&self, writes: &[StagedWrite]) -> Result<CommitReceipt> {
        let _guard = self.commit_lock.write();
        trace!(writes = writes.len(), "exclusive commit");
        Ok(self.apply(writes))
    }

    // Caller holds the commit lock exclusively.
    fn apply(&self, writes: &[StagedWrite]) -> CommitReceipt {
        let version = self.clock.next();
        let mut audit_entries = Vec::new();

        for write in writes {
            let previous_version = write.store.current_version(&write.key);

            match &write.op {
                WriteOp::Put {
                    value,
                    availability,
                } => {
                    write.store.apply_put(
                        write.key.clone(),
                        Entry::with_availability(value.clone(), version, *availability),
                    );
                }
                WriteOp::Remove => write.store.apply_remove(&write.key),
                WriteOp::Message { .. } | WriteOp::Check => {}
            }

            if let Some(spec) = &write.audit {
                let key = write.key.last().cloned().unwrap_or(Value::Null);
                let payload = match &write.op {
                    WriteOp::Message { payload } => Some(payload.clone()),
                    _ => None,
                };
                let entry = AuditEntry {
                    version,
                    table_id: spec.table_id,
                    key: key.clone(),
                    operation: spec.operation,
                    previous_version,
                    actor: spec.actor.clone(),
                    invalidated: spec.invalidated,
                    payload,
                };
                self.audit.apply_put(
                    StoreKey::audit(version, spec.table_id, key),
                    Entry::new(entry.to_value(), version),
                );
                audit_entries.push(entry);
            }
        }

        CommitReceipt {
            version,
            audit: audit_entries,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
