//! Composite ordered store keys
//!
//! Every ordered store is keyed by a `StoreKey`: a short sequence of
//! `Value` parts compared lexicographically with the store comparator
//! (`Value::total_cmp`). The part layout per store kind:
//!
//! - primary store: `[primary key]`
//! - secondary index store: `[indexed value, primary key]` - the trailing
//!   primary key is what makes duplicate indexed values representable
//! - audit store: `[version, table id, primary key]` - an ordered log
//!
//! `StoreKey` implements `Ord` via the total comparator so it can key a
//! `BTreeMap` directly; note `Eq` follows the comparator, so `Int(1)` and
//! `Float(1.0)` address the same slot, as an ordered numeric-keyed store
//! would.

use crate::types::TableId;
use crate::value::Value;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordered composite key for the underlying stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreKey {
    parts: Vec<Value>,
}

impl StoreKey {
    /// Single-part key (primary stores)
    pub fn single(part: Value) -> Self {
        Self { parts: vec![part] }
    }

    /// Two-part key (secondary index stores: indexed value + primary key)
    pub fn pair(first: Value, second: Value) -> Self {
        Self {
            parts: vec![first, second],
        }
    }

    /// Audit log key: version, table id, primary key
    pub fn audit(version: Version, table: TableId, key: Value) -> Self {
        Self {
            parts: vec![
                Value::Int(version.as_u64() as i64),
                Value::Int(table.as_u32() as i64),
                key,
            ],
        }
    }

    /// The key parts in order
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// The first part (the range-scanned dimension)
    pub fn first(&self) -> Option<&Value> {
        self.parts.first()
    }

    /// The last part (the primary key for index and audit keys)
    pub fn last(&self) -> Option<&Value> {
        self.parts.last()
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StoreKey {}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.parts.iter().zip(other.parts.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.parts.len().cmp(&other.parts.len())
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}
