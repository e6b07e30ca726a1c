//! Secondary indexes and online backfill
//!
//! One `SecondaryIndex` maps an attribute to its index store, keyed
//! `[indexed value, primary key]` with the primary key as the stored value.
//! Array attributes index per element; Null and absent attributes leave no
//! entries.
//!
//! A newly declared index starts `Backfilling`: writes maintain it from the
//! moment of declaration, but searches reject it until a background scan of
//! the primary store has populated the historical entries and flipped the
//! state to `Ready`. `BackfillHandle::wait` joins that scan.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tessera_core::{StoreKey, Value};
use tessera_storage::{CommitResult, Env, Expected, StagedWrite, Store};
use tracing::{debug, warn};

/// Lifecycle state of a secondary index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Declared; historical entries still being populated
    Backfilling,
    /// Fully populated and searchable
    Ready,
}

/// One attribute's secondary index
#[derive(Debug)]
pub struct SecondaryIndex {
    attribute: String,
    store: Arc<Store>,
    // 0 = Backfilling, 1 = Ready
    state: AtomicU8,
}

impl SecondaryIndex {
    pub(crate) fn new(attribute: impl Into<String>, store: Arc<Store>, state: IndexState) -> Self {
        Self {
            attribute: attribute.into(),
            store,
            state: AtomicU8::new(match state {
                IndexState::Backfilling => 0,
                IndexState::Ready => 1,
            }),
        }
    }

    /// The indexed attribute
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The index store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current lifecycle state
    pub fn state(&self) -> IndexState {
        if self.state.load(Ordering::Acquire) == 1 {
            IndexState::Ready
        } else {
            IndexState::Backfilling
        }
    }

    /// Whether searches may use this index
    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    pub(crate) fn mark_ready(&self) {
        self.state.store(1, Ordering::Release);
    }
}

/// The entry values an attribute contributes to its index
///
/// - absent or Null: none
/// - Array: one entry per non-null element
/// - anything else: the value itself
pub fn indexable_values(attribute_value: Option<&Value>) -> Vec<Value> {
    match attribute_value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).cloned().collect(),
        Some(other) => vec![other.clone()],
    }
}

/// Join handle for an in-flight index backfill
///
/// `wait` blocks until the backfill scan has committed every historical
/// entry and the index is `Ready`. Safe to call more than once.
#[derive(Debug)]
pub struct BackfillHandle {
    join: Mutex<Option<JoinHandle<()>>>,
}

impl BackfillHandle {
    /// Block until the backfill completes
    pub fn wait(&self) {
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("index backfill thread panicked");
            }
        }
    }
}

/// Scan the primary store in the background and populate the index
///
/// Live writes maintain the index from the moment of declaration, so the
/// scan only has to cover records committed before it. Each record's
/// entries commit in their own conditional batch, guarded on the primary
/// version the scan observed; when the guard fails the record is re-read
/// and retried, so the backfill never reinstates an entry a concurrent
/// write already replaced. The per-record commits also keep the scan from
/// holding the commit lock across the whole table.
pub(crate) fn spawn_backfill(
    env: Arc<Env>,
    primary: Arc<Store>,
    index: Arc<SecondaryIndex>,
) -> BackfillHandle {
    let handle = std::thread::spawn(move || {
        let attribute = index.attribute().to_string();
        let mut total = 0usize;
        for (key, mut entry) in primary.scan() {
            let Some(pk) = key.first().cloned() else { continue };
            loop {
                let mut writes = vec![StagedWrite::check(Arc::clone(&primary), key.clone())
                    .expecting(Expected::At(entry.version))];
                for indexed in indexable_values(entry.value.get_attr(&attribute)) {
                    writes.push(StagedWrite::put(
                        Arc::clone(index.store()),
                        StoreKey::pair(indexed, pk.clone()),
                        pk.clone(),
                    ));
                }
                if writes.len() == 1 {
                    break;
                }
                match env.commit_conditional(&writes) {
                    Ok(CommitResult::Committed(_)) => {
                        total += writes.len() - 1;
                        break;
                    }
                    Ok(CommitResult::Conflict(_)) => {
                        // The record moved under the scan; index its current
                        // state instead of the stale one.
                        match primary.get(&key) {
                            Some(current) => entry = current,
                            None => break,
                        }
                    }
                    Err(err) => {
                        warn!(attribute = %attribute, %err, "index backfill failed");
                        return;
                    }
                }
            }
        }
        index.mark_ready();
        debug!(attribute = %attribute, entries = total, "index backfill complete");
    });
    BackfillHandle {
        join: Mutex::new(Some(handle)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexable_values() {
        assert!(indexable_values(None).is_empty());
        assert!(indexable_values(Some(&Value::Null)).is_empty());
        assert_eq!(
            indexable_values(Some(&Value::String("CO".into()))),
            vec![Value::String("CO".into())]
        );
        assert_eq!(
            indexable_values(Some(&Value::Array(vec![
                Value::Int(1),
                Value::Null,
                Value::Int(2)
            ]))),
            vec![Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_state_transitions() {
        let env = Env::new();
        let index = SecondaryIndex::new("state", env.store("i"), IndexState::Backfilling);
        assert!(!index.is_ready());
        index.mark_ready();
        assert_eq!(index.state(), IndexState::Ready);
    }

    #[test]
    fn test_backfill_populates_existing_records() {
        let env = Arc::new(Env::new());
        let primary = env.store("table:w:primary");
        let mut seed = Vec::new();
        for (pk, state) in [(7i64, "CO"), (23, "CO"), (4, "NY")] {
            seed.push(StagedWrite::put(
                Arc::clone(&primary),
                StoreKey::single(Value::Int(pk)),
                Value::object([("id", Value::Int(pk)), ("state", state.into())]),
            ));
        }
        env.commit_exclusive(&seed).unwrap();

        let index = Arc::new(SecondaryIndex::new(
            "state",
            env.store("table:w:index:state"),
            IndexState::Backfilling,
        ));
        let handle = spawn_backfill(Arc::clone(&env), primary, Arc::clone(&index));
        handle.wait();
        handle.wait(); // idempotent

        assert!(index.is_ready());
        assert_eq!(index.store().count_prefix(&"CO".into()), 2);
        assert_eq!(index.store().count_prefix(&"NY".into()), 1);
        let co = index.store().scan_prefix(&"CO".into());
        assert_eq!(co[0].1.value, Value::Int(7));
        assert_eq!(co[1].1.value, Value::Int(23));
    }
}
