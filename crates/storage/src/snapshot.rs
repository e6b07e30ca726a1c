//! Clone-based read snapshots
//!
//! A `StoreSnapshot` captures one store at a point in time by cloning its
//! map under the database read guard, giving multi-version read isolation:
//! a transaction reading through its snapshot never observes writes
//! committed after the snapshot was taken, and never observes a partially
//! applied commit.
//!
//! Cloning the whole map is O(n) but correct; the snapshot trait boundary
//! allows a copy-on-write implementation later without touching callers.

use crate::entry::Entry;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tessera_core::{StoreKey, Value};

/// Immutable point-in-time view of one store
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    data: Arc<BTreeMap<StoreKey, Entry>>,
}

impl StoreSnapshot {
    pub(crate) fn new(data: Arc<BTreeMap<StoreKey, Entry>>) -> Self {
        Self { data }
    }

    /// Read one entry as of snapshot time
    pub fn get(&self, key: &StoreKey) -> Option<Entry> {
        self.data.get(key).cloned()
    }

    /// Number of entries as of snapshot time
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the snapshot was empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Full ordered scan as of snapshot time
    pub fn scan(&self) -> impl Iterator<Item = (&StoreKey, &Entry)> {
        self.data.iter()
    }

    /// All entries whose first key part equals `first`, as of snapshot time
    ///
    /// The snapshot analogue of `Store::scan_prefix`; the search evaluator
    /// reads index candidate streams through this so a query sees one
    /// consistent point in time.
    pub fn scan_prefix(&self, first: &Value) -> impl Iterator<Item = (&StoreKey, &Entry)> {
        let first = first.clone();
        self.data
            .range((
                Bound::Included(StoreKey::single(first.clone())),
                Bound::Unbounded,
            ))
            .take_while(move |(k, _)| {
                k.first()
                    .is_some_and(|part| part.total_cmp(&first) == Ordering::Equal)
            })
    }

    /// Range scan over the first key part, as of snapshot time
    pub fn range_by_first<'a>(
        &'a self,
        start: Bound<&'a Value>,
        end: Bound<&'a Value>,
    ) -> impl Iterator<Item = (&'a StoreKey, &'a Entry)> {
        let lower = match start {
            Bound::Included(v) | Bound::Excluded(v) => {
                Bound::Included(StoreKey::single(v.clone()))
            }
            Bound::Unbounded => Bound::Unbounded,
        };
        self.data
            .range((lower, Bound::Unbounded))
            .filter(move |(k, _)| match start {
                // Excluded start: skip entries still equal to the bound
                Bound::Excluded(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) == Ordering::Greater),
                _ => true,
            })
            .take_while(move |(k, _)| match end {
                Bound::Included(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) != Ordering::Greater),
                Bound::Excluded(v) => k
                    .first()
                    .is_some_and(|part| part.total_cmp(v) == Ordering::Less),
                Bound::Unbounded => true,
            })
    }
}
