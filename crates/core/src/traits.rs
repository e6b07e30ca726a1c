//! Capability traits consumed by the engine
//!
//! The backing "source" for cache-style tables is an explicit optional
//! capability attached to a table when it is opened, not a mutable
//! table-level field. The engine consults it on cache miss, invalidation,
//! and TTL lapse; tables without a source never call out.

use crate::error::Result;
use crate::timestamp::Timestamp;
use crate::value::Value;
use std::collections::BTreeMap;

/// A record fetched from a backing source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Attribute values from the source; shallow-merged over local ones
    pub attributes: BTreeMap<String, Value>,
    /// The source's own modification time, when it reports one
    pub modified: Option<Timestamp>,
}

impl SourceRecord {
    /// A source record with no modification time
    pub fn new(attributes: BTreeMap<String, Value>) -> Self {
        Self {
            attributes,
            modified: None,
        }
    }
}

/// Backing provider consulted on cache miss or invalidation
///
/// Implementations are typically network clients; errors propagate to the
/// caller of `get` as `Error::SourceFetch`.
pub trait Source: Send + Sync {
    /// Fetch the upstream record for a primary key
    fn get(&self, key: &Value) -> Result<Option<SourceRecord>>;
}
