//! Transaction batches and the optimistic commit protocol
//!
//! A `Transaction` is an in-memory, per-session batch of staged writes
//! plus lazily created per-store read snapshots. It is created on first
//! use, cleared by a successful `commit` or an explicit `abort`, and the
//! same object is reusable for the next batch.
//!
//! # Commit algorithm
//!
//! Every attempt, including retries:
//!
//! 1. Drop all read snapshots - each attempt must observe the newest
//!    committed state, not a stale read view.
//! 2. Run every staging step. The table layer stages its writes this way,
//!    so derived data (index diffs, version expectations, writable-record
//!    folds) is recomputed from the fresh snapshots instead of being
//!    retried stale.
//! 3. While the batch is small enough (`BASE_OPTIMISTIC_THRESHOLD >>
//!    retries`) and the retry ceiling is not reached, attempt a
//!    conditional commit: every write applies only if its key's stored
//!    version still equals the version read when the write was staged. A
//!    single failed check rejects the whole batch; directly added writes
//!    have their expectation refreshed and the loop retries.
//! 4. Past either bound, escalate to the exclusive (serializing) path,
//!    which applies the batch unconditionally and terminates the loop.
//!
//! Version-check failures never surface to callers; the only observable
//! failures are validation errors raised before staging and storage I/O
//! errors, which propagate unmodified.

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{AuditEntry, Result, StoreKey, Version};
use tessera_storage::{
    CommitReceipt, CommitResult, Entry, Env, Expected, StagedWrite, Store, StoreSnapshot,
};
use tracing::{debug, trace};

/// Largest batch eligible for an optimistic first attempt; halves with
/// every retry.
pub const BASE_OPTIMISTIC_THRESHOLD: usize = 100;

/// Hard ceiling on optimistic attempts before escalating
///
/// The size threshold alone cannot bound retries for small batches that
/// conflict on every attempt, so the loop also escalates after this many
/// conflicts.
pub const MAX_OPTIMISTIC_RETRIES: u32 = 4;

/// Result of a successful commit
#[derive(Debug)]
pub struct CommitOutcome {
    /// The version/timestamp assigned to this commit
    pub txn_time: Version,
    /// Audit entries appended by this commit
    pub audit: Vec<AuditEntry>,
}

/// Re-runnable staging step, executed on every commit attempt
pub type WriteStager = Box<dyn FnMut(&mut Transaction) -> Result<()> + Send>;

/// An in-memory batch of pending writes against one database
pub struct Transaction {
    env: Arc<Env>,
    writes: Vec<StagedWrite>,
    stagers: Vec<WriteStager>,
    snapshots: HashMap<String, StoreSnapshot>,
}

impl Transaction {
    /// Start an empty transaction against a database environment
    pub fn new(env: Arc<Env>) -> Self {
        Self {
            env,
            writes: Vec::new(),
            stagers: Vec::new(),
            snapshots: HashMap::new(),
        }
    }

    /// The environment this transaction commits against
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Stage one write
    pub fn add_write(&mut self, write: StagedWrite) {
        self.writes.push(write);
    }

    /// Queue a staging step to run on every commit attempt
    ///
    /// The table layer stages puts, deletes, and writable-record folds
    /// this way: because the step re-runs after a conflict, its derived
    /// writes and version expectations always reflect the freshest
    /// committed state.
    pub fn stage(&mut self, stager: WriteStager) {
        self.stagers.push(stager);
    }

    /// Number of directly staged writes
    ///
    /// Writes produced by staging steps only exist while a commit attempt
    /// is in flight and are not counted here.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Whether anything is staged
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.stagers.is_empty()
    }

    /// Read a key through this transaction's snapshot of a store
    ///
    /// The snapshot is taken lazily on the first read of each store and
    /// held until commit or abort, so repeated reads are stable.
    pub fn read(&mut self, store: &Arc<Store>, key: &StoreKey) -> Option<Entry> {
        self.snapshot(store).get(key)
    }

    /// The transaction's snapshot of a store, for range reads
    ///
    /// Same lifecycle as `read`: taken lazily, stable until commit or abort.
    pub fn snapshot_of(&mut self, store: &Arc<Store>) -> &StoreSnapshot {
        self.snapshot(store)
    }

    fn snapshot(&mut self, store: &Arc<Store>) -> &StoreSnapshot {
        if !self.snapshots.contains_key(store.name()) {
            let snapshot = self.env.snapshot(store);
            self.snapshots.insert(store.name().to_string(), snapshot);
        }
        &self.snapshots[store.name()]
    }

    /// Commit the batch
    ///
    /// Transparently retries optimistic conflicts and escalates to the
    /// exclusive path; on success the transaction is empty and reusable.
    pub fn commit(&mut self) -> Result<CommitOutcome> {
        let mut stagers = std::mem::take(&mut self.stagers);
        let directly_staged = self.writes.len();

        let mut retries: u32 = 0;
        let receipt: CommitReceipt = loop {
            // Fresh reads for every attempt; staging steps re-derive their
            // writes from the new snapshots.
            self.snapshots.clear();
            self.writes.truncate(directly_staged);
            for stager in stagers.iter_mut() {
                if let Err(err) = stager(self) {
                    self.writes.truncate(directly_staged);
                    return Err(err);
                }
            }

            let threshold = BASE_OPTIMISTIC_THRESHOLD >> retries;
            if retries >= MAX_OPTIMISTIC_RETRIES || self.writes.len() > threshold {
                debug!(
                    retries,
                    writes = self.writes.len(),
                    "escalating to exclusive commit"
                );
                break self.env.commit_exclusive(&self.writes)?;
            }

            match self.env.commit_conditional(&self.writes)? {
                CommitResult::Committed(receipt) => break receipt,
                CommitResult::Conflict(conflicts) => {
                    trace!(retries, conflicts = conflicts.len(), "re-staging after conflict");
                    for conflict in conflicts {
                        // Stager-produced writes are recomputed wholesale on
                        // the next attempt; only directly added writes need
                        // their expectation refreshed here.
                        if conflict.index < directly_staged {
                            self.writes[conflict.index].expected =
                                Some(Expected::from_observed(conflict.current));
                        }
                    }
                    retries += 1;
                }
            }
        };

        self.writes.clear();
        Ok(CommitOutcome {
            txn_time: receipt.version,
            audit: receipt.audit,
        })
    }

    /// Discard every staged write and read snapshot without applying
    pub fn abort(&mut self) {
        self.writes.clear();
        self.stagers.clear();
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Value;

    fn pk(i: i64) -> StoreKey {
        StoreKey::single(Value::Int(i))
    }

    fn setup() -> (Arc<Env>, Arc<Store>) {
        let env = Arc::new(Env::new());
        let store = env.store("t");
        (env, store)
    }

    #[test]
    fn test_commit_applies_and_clears() {
        let (env, store) = setup();
        let mut txn = Transaction::new(Arc::clone(&env));
        txn.add_write(
            StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(10))
                .expecting(Expected::Absent),
        );
        let outcome = txn.commit().unwrap();
        assert_eq!(store.get(&pk(1)).unwrap().version, outcome.txn_time);
        assert!(txn.is_empty(), "transaction is reusable after commit");
    }

    #[test]
    fn test_reuse_after_commit() {
        let (env, store) = setup();
        let mut txn = Transaction::new(Arc::clone(&env));
        txn.add_write(StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(1)));
        let first = txn.commit().unwrap();
        txn.add_write(StagedWrite::put(Arc::clone(&store), pk(2), Value::Int(2)));
        let second = txn.commit().unwrap();
        assert!(second.txn_time > first.txn_time);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_conflict_retries_transparently() {
        let (env, store) = setup();

        // Stage against the current (absent) state...
        let mut txn = Transaction::new(Arc::clone(&env));
        txn.add_write(
            StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(10))
                .expecting(Expected::Absent),
        );

        // ...then let another writer commit first.
        env.commit_exclusive(&[StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(5))])
            .unwrap();

        // Commit still succeeds; the conflict is retried, not surfaced.
        let outcome = txn.commit().unwrap();
        let entry = store.get(&pk(1)).unwrap();
        assert_eq!(entry.value, Value::Int(10));
        assert_eq!(entry.version, outcome.txn_time);
    }

    #[test]
    fn test_large_batch_goes_exclusive() {
        let (env, store) = setup();
        let mut txn = Transaction::new(Arc::clone(&env));
        for i in 0..(BASE_OPTIMISTIC_THRESHOLD as i64 + 1) {
            // Stale expectations on every write: optimistic mode would
            // conflict, but the batch is over threshold so it must go
            // exclusive and apply anyway.
            txn.add_write(
                StagedWrite::put(Arc::clone(&store), pk(i), Value::Int(i))
                    .expecting(Expected::At(Version::from_u64(999))),
            );
        }
        txn.commit().unwrap();
        assert_eq!(store.len(), BASE_OPTIMISTIC_THRESHOLD + 1);
    }

    #[test]
    fn test_abort_discards_writes() {
        let (env, store) = setup();
        let mut txn = Transaction::new(Arc::clone(&env));
        txn.add_write(StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(10)));
        txn.abort();
        assert!(txn.is_empty());
        txn.commit().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_reads_are_stable() {
        let (env, store) = setup();
        env.commit_exclusive(&[StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(1))])
            .unwrap();

        let mut txn = Transaction::new(Arc::clone(&env));
        let before = txn.read(&store, &pk(1)).unwrap();

        env.commit_exclusive(&[StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(2))])
            .unwrap();

        // Same transaction still sees its snapshot...
        assert_eq!(txn.read(&store, &pk(1)).unwrap().value, before.value);

        // ...until commit resets the read view.
        txn.commit().unwrap();
        assert_eq!(txn.read(&store, &pk(1)).unwrap().value, Value::Int(2));
    }

    #[test]
    fn test_stagers_fold_at_commit() {
        let (env, store) = setup();
        let mut txn = Transaction::new(Arc::clone(&env));
        let store2 = Arc::clone(&store);
        txn.stage(Box::new(move |txn| {
            txn.add_write(StagedWrite::put(Arc::clone(&store2), pk(9), Value::Int(90)));
            Ok(())
        }));
        assert_eq!(txn.pending_writes(), 0);
        assert!(!txn.is_empty());
        txn.commit().unwrap();
        assert_eq!(store.get(&pk(9)).unwrap().value, Value::Int(90));
        assert!(txn.is_empty(), "stagers are consumed by commit");
    }

    #[test]
    fn test_stagers_recompute_from_fresh_state() {
        let (env, store) = setup();
        env.commit_exclusive(&[StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(1))])
            .unwrap();

        // Read through the transaction first so a stale snapshot exists.
        let mut txn = Transaction::new(Arc::clone(&env));
        assert_eq!(txn.read(&store, &pk(1)).unwrap().value, Value::Int(1));

        // The stager derives its write and expectation from whatever it
        // reads when the commit attempt runs.
        let store2 = Arc::clone(&store);
        txn.stage(Box::new(move |txn| {
            let current = txn.read(&store2, &pk(1)).ok_or_else(|| {
                tessera_core::Error::Storage("entry vanished".to_string())
            })?;
            let next = current.value.as_int().unwrap_or(0) + 1;
            txn.add_write(
                StagedWrite::put(Arc::clone(&store2), pk(1), Value::Int(next))
                    .expecting(Expected::At(current.version)),
            );
            Ok(())
        }));

        // Another writer lands before the commit begins.
        env.commit_exclusive(&[StagedWrite::put(Arc::clone(&store), pk(1), Value::Int(10))])
            .unwrap();

        txn.commit().unwrap();
        assert_eq!(store.get(&pk(1)).unwrap().value, Value::Int(11));
    }
}
