//! Storage-internal entry type
//!
//! `Entry` is what a store actually holds per key: the value, the commit
//! version, and the availability marker. It is distinct from the contract
//! `Record` type the table layer hands to callers.

use tessera_core::{Availability, Value, Version};

/// One stored value with its system fields
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The stored value (an object for primary stores, the primary key for
    /// index stores, an encoded audit entry for the audit store)
    pub value: Value,
    /// Commit version assigned when this entry was written
    pub version: Version,
    /// Source-fallback marker; only meaningful on primary stores
    pub availability: Availability,
}

impl Entry {
    /// Entry with default availability
    pub fn new(value: Value, version: Version) -> Self {
        Self {
            value,
            version,
            availability: Availability::Cached,
        }
    }

    /// Entry with an explicit availability marker
    pub fn with_availability(value: Value, version: Version, availability: Availability) -> Self {
        Self {
            value,
            version,
            availability,
        }
    }
}
