//! Frozen record model
//!
//! A `Record` is an immutable mapping of attribute name to value plus two
//! implicit system fields: the `version` assigned at commit and the
//! `availability` marker driving source fallback on cache-style tables.
//! Records are never mutated in place; every update produces a new record
//! under the same key with a strictly greater version. Mutation goes
//! through the copy-on-write `WritableRecord` layer instead.

use crate::value::Value;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source-fallback availability marker
///
/// - `Cached`: the local copy is authoritative (until its TTL lapses)
/// - `Invalidated`: a newer upstream state exists; the next read with a
///   source configured re-fetches
/// - `Resolving`: a fetch is already in flight; concurrent readers use the
///   local copy instead of fanning out to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Availability {
    /// Locally cached and valid
    #[default]
    Cached,
    /// Known stale; re-fetch on next sourced read
    Invalidated,
    /// An upstream fetch is in flight
    Resolving,
}

/// An immutable, committed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    attributes: BTreeMap<String, Value>,
    version: Version,
    availability: Availability,
}

impl Record {
    /// Create an uncommitted record from attributes
    ///
    /// The version is `ZERO` until the record round-trips through a commit.
    pub fn new(attributes: BTreeMap<String, Value>) -> Self {
        Self {
            attributes,
            version: Version::ZERO,
            availability: Availability::Cached,
        }
    }

    /// Reconstruct a record with explicit system fields (storage read path)
    pub fn with_system(
        attributes: BTreeMap<String, Value>,
        version: Version,
        availability: Availability,
    ) -> Self {
        Self {
            attributes,
            version,
            availability,
        }
    }

    /// Read one attribute
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// All attributes
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Consume into the attribute map
    pub fn into_attributes(self) -> BTreeMap<String, Value> {
        self.attributes
    }

    /// The commit version (logical timestamp)
    pub fn version(&self) -> Version {
        self.version
    }

    /// The availability marker
    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// The attributes as an object value (storage write path)
    pub fn to_value(&self) -> Value {
        Value::Object(self.attributes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut attrs = BTreeMap::new();
        attrs.insert("id".to_string(), Value::Int(7));
        attrs.insert("state".to_string(), Value::String("CO".into()));
        Record::with_system(attrs, Version::from_u64(42), Availability::Cached)
    }

    #[test]
    fn test_record_accessors() {
        let record = sample();
        assert_eq!(record.get("id"), Some(&Value::Int(7)));
        assert_eq!(record.get("missing"), None);
        assert_eq!(record.version().as_u64(), 42);
        assert_eq!(record.availability(), Availability::Cached);
    }

    #[test]
    fn test_new_record_is_unversioned() {
        let record = Record::new(BTreeMap::new());
        assert_eq!(record.version(), Version::ZERO);
    }

    #[test]
    fn test_to_value_round_trip() {
        let record = sample();
        let value = record.to_value();
        assert_eq!(value.get_attr("state"), Some(&Value::String("CO".into())));
        let rebuilt = Record::with_system(
            value.into_object().unwrap(),
            record.version(),
            record.availability(),
        );
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_availability_default() {
        assert_eq!(Availability::default(), Availability::Cached);
    }
}
