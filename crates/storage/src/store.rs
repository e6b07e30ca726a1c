//! Ordered store backed by BTreeMap with RwLock
//!
//! One `Store` is one ordered map from `StoreKey` to `Entry`:
//! a table's primary store, one secondary index, the audit log, or the
//! metadata store. Cross-store atomicity and version assignment live in
//! `Env`; a `Store` only knows how to read, range-scan, and (crate-
//! internally) apply already-validated writes.
//!
//! # Design Notes
//!
//! - Range scans materialize into a `Vec` under the read lock; iteration
//!   never holds the lock
//! - `range_by_first` ranges over the *first* key part only, which is the
//!   scanned dimension for both primary stores (`[pk]`) and index stores
//!   (`[indexed value, pk]`)
//! - Snapshots clone the map; see `snapshot.rs` for the read-isolation
//!   contract

use crate::entry::Entry;
use crate::snapshot::StoreSnapshot;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tessera_core::{StoreKey, Value, Version};

/// A single ordered key-value store
#[derive(Debug)]
pub struct Store {
    name: String,
    data: RwLock<BTreeMap<StoreKey, Entry>>,
}

impl Store {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// The store's name within its database
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one entry
    pub fn get(&self, key: &StoreKey) -> Option<Entry> {
        self.data.read().get(key).cloned()
    }

    /// The stored version for a key, if present
    pub fn current_version(&self, key: &StoreKey) -> Option<Version> {
        self.data.read().get(key).map(|e| e.version)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Full ordered scan
    pub fn scan(&self) -> Vec<(StoreKey, Entry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// All entries whose first key part equals `first`
    ///
    /// For an index store this is "all primary keys indexed under this
    /// value"; entries come back in primary-key order.
    pub fn scan_prefix(&self, first: &Value) -> Vec<(StoreKey, Entry)> {
        let data = self.data.read();
        data.range((Bound::Included(StoreKey::single(first.clone())), Bound::Unbounded))
            .take_while(|(k, _)| {
                k.first()
                    .is_some_and(|part| part.total_cmp(first) == Ordering::Equal)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries whose first key part equals `first`
    ///
    /// This is the index cardinality used by cost-based condition ordering.
    pub fn count_prefix(&self, first: &Value) -> usize {
        let data = self.data.read();
        data.range((Bound::Included(StoreKey::single(first.clone())), Bound::Unbounded))
            .take_while(|(k, _)| {
                k.first()
                    .is_some_and(|part| part.total_cmp(first) == Ordering::Equal)
            })
            .count()
    }

    /// Range scan over the first key part
    ///
    /// Bounds compare with the store key comparator (`Value::total_cmp`).
    pub fn range_by_first(
        &self,
        start: Bound<&Value>,
        end: Bound<&Value>,
    ) -> Vec<(StoreKey, Entry)> {
        let data = self.data.read();
        let lower = match start {
            Bound::Included(v) | Bound::Excluded(v) => {
                Bound::Included(StoreKey::single(v.clone()))
            }
            Bound::Unbounded => Bound::Unbounded,
        };
        data.range((lower, Bound::Unbounded))
            .filter(|(k, _)| match start {
                // Excluded start: skip entries still equal to the bound
                Bound::Excluded(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) == Ordering::Greater),
                _ => true,
            })
            .take_while(|(k, _)| match end {
                Bound::Included(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) != Ordering::Greater),
                Bound::Excluded(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) == Ordering::Less),
                Bound::Unbounded => true,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Point-in-time snapshot of the whole store
    pub(crate) fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(Arc::new(self.data.read().clone()))
    }

    // Write paths, called by Env under the database commit lock only.

    pub(crate) fn apply_put(&self, key: StoreKey, entry: Entry) {
        self.data.write().insert(key, entry);
    }

    pub(crate) fn apply_remove(&self, key: &StoreKey) {
        self.data.write().remove(key);
    }
}
